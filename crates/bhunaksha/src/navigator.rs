//! District → taluka → village hierarchy lookups.

use serde_json::Value;

use crate::config::EngineConfig;
use crate::transport::SessionTransport;
use crate::types::{Category, LevelEntry};

const LEVEL_ENDPOINT: &str = "VillageMapService/ListsAfterLevelGeoref";

/// Hierarchy levels understood by the backend.
pub mod level {
    pub const DISTRICT: u32 = 1;
    pub const TALUKA: u32 = 2;
    pub const VILLAGE: u32 = 3;
}

/// Generic dropdown lookup over the shared session.
#[derive(Clone)]
pub struct LevelNavigator {
    transport: SessionTransport,
    url: String,
    state_code: String,
    timeout: std::time::Duration,
}

impl LevelNavigator {
    pub fn new(transport: SessionTransport, config: &EngineConfig) -> Self {
        Self {
            transport,
            url: format!("{}/{LEVEL_ENDPOINT}", config.rest_url()),
            state_code: config.state_code.clone(),
            timeout: config.request_timeout(),
        }
    }

    /// Fetch one level of the hierarchy.
    ///
    /// `codes` is the comma-joined ancestor path ending in a comma, e.g.
    /// `"R,25,"` for the talukas of district 25. The backend answers with a
    /// list of lists; only the first inner list is meaningful. Transport
    /// failures and empty or oddly shaped answers yield an empty list.
    pub async fn fetch_level(&self, level: u32, codes: &str) -> Vec<Value> {
        tracing::debug!("Fetching level {level} with codes {codes}");
        let form = [
            ("state", self.state_code.clone()),
            ("level", level.to_string()),
            ("codes", codes.to_string()),
            ("hasmap", "true".to_string()),
        ];
        let response = match self.transport.post(&self.url, &form, &[], self.timeout).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Error fetching level {level} ({codes}): {e}");
                return Vec::new();
            }
        };

        let body: Value = match response.json() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Level {level} response was not JSON: {e}");
                return Vec::new();
            }
        };

        first_inner_list(body)
    }

    pub async fn fetch_districts(&self, category: Category) -> Vec<LevelEntry> {
        let codes = format!("{},", category.code());
        self.fetch_entries(level::DISTRICT, &codes).await
    }

    pub async fn fetch_talukas(
        &self,
        district_code: &str,
        category: Category,
    ) -> Vec<LevelEntry> {
        let codes = format!("{},{district_code},", category.code());
        self.fetch_entries(level::TALUKA, &codes).await
    }

    pub async fn fetch_villages(
        &self,
        district_code: &str,
        taluka_code: &str,
        category: Category,
    ) -> Vec<LevelEntry> {
        let codes = format!("{},{district_code},{taluka_code},", category.code());
        self.fetch_entries(level::VILLAGE, &codes).await
    }

    async fn fetch_entries(&self, level: u32, codes: &str) -> Vec<LevelEntry> {
        let raw = self.fetch_level(level, codes).await;
        let total = raw.len();
        let entries: Vec<LevelEntry> = raw
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        if entries.len() < total {
            tracing::warn!(
                "Level {level}: skipped {} malformed entries",
                total - entries.len()
            );
        }
        tracing::debug!("Level {level}: {} entries", entries.len());
        entries
    }
}

fn first_inner_list(body: Value) -> Vec<Value> {
    match body {
        Value::Array(outer) => match outer.into_iter().next() {
            Some(Value::Array(inner)) => inner,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn navigator_for(server: &MockServer) -> LevelNavigator {
        let mut config = EngineConfig::default().with_base_url(&server.uri());
        config.request_timeout_ms = 5_000;
        let transport = SessionTransport::new(&config).unwrap();
        LevelNavigator::new(transport, &config)
    }

    #[test]
    fn test_first_inner_list_shapes() {
        assert_eq!(
            first_inner_list(json!([[{"code": "1"}], [{"code": "x"}]])),
            vec![json!({"code": "1"})]
        );
        assert!(first_inner_list(json!([])).is_empty());
        assert!(first_inner_list(json!({"error": "x"})).is_empty());
        assert!(first_inner_list(json!(["not a list"])).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_talukas_sends_codes_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/rest/{LEVEL_ENDPOINT}")))
            .and(body_string_contains("level=2"))
            .and(body_string_contains("codes=R%2C25%2C"))
            .and(body_string_contains("hasmap=true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                [{"code": "02", "value": "Ambegaon"}, {"code": "03", "value": "Baramati"}]
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let nav = navigator_for(&server);
        let talukas = nav.fetch_talukas("25", Category::Rural).await;
        assert_eq!(talukas.len(), 2);
        assert_eq!(talukas[0].code, "02");
        assert_eq!(talukas[1].label, "Baramati");
    }

    #[tokio::test]
    async fn test_empty_response_is_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let nav = navigator_for(&server);
        assert!(nav.fetch_districts(Category::Urban).await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                [{"code": "05", "value": "Akola"}, {"label": "no code"}, 7]
            ])))
            .mount(&server)
            .await;

        let nav = navigator_for(&server);
        let districts = nav.fetch_districts(Category::Rural).await;
        assert_eq!(districts.len(), 1);
        assert_eq!(districts[0].label, "Akola");
    }

    #[tokio::test]
    async fn test_transport_failure_is_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let nav = navigator_for(&server);
        assert!(nav
            .fetch_villages("25", "02", Category::Rural)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_empty_list() {
        let mut config = EngineConfig::default().with_base_url("http://127.0.0.1:9");
        config.request_timeout_ms = 2_000;
        let transport = SessionTransport::new(&config).unwrap();
        let nav = LevelNavigator::new(transport, &config);
        assert!(nav.fetch_level(level::DISTRICT, "R,").await.is_empty());
    }
}
