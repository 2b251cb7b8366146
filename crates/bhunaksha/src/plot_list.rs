//! Plot-number listing for a village.

use std::cmp::Ordering;
use std::time::Duration;

use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::transport::SessionTransport;
use crate::types::LocationCode;

const PLOT_LIST_ENDPOINT: &str = "VillageMapService/kidelistFromGisCodeMH";

/// Resolves a village into the plot numbers the backend knows about.
#[derive(Clone)]
pub struct PlotListFetcher {
    transport: SessionTransport,
    url: String,
    state_code: String,
    referer: String,
    timeout: Duration,
}

impl PlotListFetcher {
    pub fn new(transport: SessionTransport, config: &EngineConfig) -> Self {
        Self {
            transport,
            url: format!("{}/{PLOT_LIST_ENDPOINT}", config.rest_url()),
            state_code: config.state_code.clone(),
            referer: config.referer.clone(),
            timeout: config.request_timeout(),
        }
    }

    /// Plot numbers of a village, exactly as the server lists them.
    ///
    /// Any failure yields an empty list; an empty village is a normal
    /// answer for callers.
    pub async fn fetch_plot_list(&self, location: &LocationCode) -> Vec<String> {
        let giscode = location.giscode();
        match self.try_fetch(&giscode).await {
            Ok(plots) => {
                tracing::debug!("Plot list for {giscode}: {} plots", plots.len());
                plots
            }
            Err(e) => {
                tracing::warn!("Error fetching plot list for {giscode}: {e}");
                Vec::new()
            }
        }
    }

    async fn try_fetch(&self, giscode: &str) -> EngineResult<Vec<String>> {
        let form = [
            ("state", self.state_code.clone()),
            ("logedLevels", giscode.to_string()),
        ];
        // The backend only authorises the listing when the referer names
        // the village being listed.
        let headers = [("Referer", format!("{}?logedLevels={giscode}", self.referer))];

        let response = self
            .transport
            .post(&self.url, &form, &headers, self.timeout)
            .await?;

        match response.json::<Value>()? {
            Value::Array(items) => Ok(items.into_iter().filter_map(plot_number).collect()),
            other => Err(EngineError::Parse(format!(
                "Expected a list of plot numbers, got {}",
                type_name(&other)
            ))),
        }
    }
}

fn plot_number(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Sort plot numbers for display: integers numerically, then decimals,
/// then everything else (`"12/A"`, `"G-3"`) as plain strings.
pub fn sort_plot_numbers(plots: &mut [String]) {
    plots.sort_by(|a, b| compare_plot_numbers(a, b));
}

pub(crate) fn compare_plot_numbers(a: &str, b: &str) -> Ordering {
    match (sort_key(a), sort_key(b)) {
        (PlotSortKey::Number(x), PlotSortKey::Number(y)) => {
            x.partial_cmp(&y).unwrap_or(Ordering::Equal).then_with(|| a.cmp(b))
        }
        (PlotSortKey::Number(_), PlotSortKey::Text) => Ordering::Less,
        (PlotSortKey::Text, PlotSortKey::Number(_)) => Ordering::Greater,
        (PlotSortKey::Text, PlotSortKey::Text) => a.cmp(b),
    }
}

enum PlotSortKey {
    Number(f64),
    Text,
}

fn sort_key(plot: &str) -> PlotSortKey {
    let numeric = !plot.is_empty()
        && plot.chars().all(|c| c.is_ascii_digit() || c == '.')
        && plot.matches('.').count() <= 1;
    match plot.parse::<f64>() {
        Ok(n) if numeric => PlotSortKey::Number(n),
        _ => PlotSortKey::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher_for(server: &MockServer) -> PlotListFetcher {
        let config = EngineConfig::default().with_base_url(&server.uri());
        let transport = SessionTransport::new(&config).unwrap();
        PlotListFetcher::new(transport, &config)
    }

    fn village() -> LocationCode {
        LocationCode::new(Category::Rural, "25", "02", "272500020303690000")
    }

    #[tokio::test]
    async fn test_plot_list_verbatim_order() {
        let server = MockServer::start().await;
        let referer = format!(
            "{}/27/index.html?logedLevels=RVM2502272500020303690000",
            server.uri()
        );
        Mock::given(method("POST"))
            .and(path(format!("/rest/{PLOT_LIST_ENDPOINT}")))
            .and(body_string_contains("logedLevels=RVM2502272500020303690000"))
            .and(header("referer", referer.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(["10", "2", "1/A", 7])))
            .expect(1)
            .mount(&server)
            .await;

        let plots = fetcher_for(&server).fetch_plot_list(&village()).await;
        assert_eq!(plots, vec!["10", "2", "1/A", "7"]);
    }

    #[tokio::test]
    async fn test_failure_yields_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(fetcher_for(&server).fetch_plot_list(&village()).await.is_empty());
    }

    #[tokio::test]
    async fn test_non_list_body_yields_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "denied"})))
            .mount(&server)
            .await;

        assert!(fetcher_for(&server).fetch_plot_list(&village()).await.is_empty());
    }

    #[test]
    fn test_sort_plot_numbers() {
        let mut plots: Vec<String> = ["10", "2", "G-3", "1.5", "12/A", "1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        sort_plot_numbers(&mut plots);
        assert_eq!(plots, vec!["1", "1.5", "2", "10", "12/A", "G-3"]);
    }
}
