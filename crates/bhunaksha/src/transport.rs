//! Persistent HTTP session for the map service.
//!
//! Wraps reqwest with a shared cookie jar and fixed browser-like headers.
//! The backend sometimes answers a POST with a 302 to force a cookie
//! refresh; [`SessionTransport::post`] absorbs that by replaying the POST.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, REFERER, USER_AGENT};
use serde::de::DeserializeOwned;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Response from a POST, body fully read.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Requested URL.
    pub url: String,
    /// Final URL after any redirects on the replay.
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// Decode the body as JSON. The service often labels JSON as
    /// `text/html`, so the content type is ignored.
    pub fn json<T: DeserializeOwned>(&self) -> EngineResult<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| EngineError::Parse(format!("{}: {e}", self.url)))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Cookie-aware HTTP session shared by every component and worker.
///
/// Cloning is cheap and clones share the same connection pools and
/// cookie jar.
#[derive(Clone)]
pub struct SessionTransport {
    /// Redirects disabled: a followed 302 would turn the POST into a GET.
    client: reqwest::Client,
    /// Default redirect handling, used only for the cookie-challenge replay.
    follow_client: reqwest::Client,
}

impl SessionTransport {
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&config.user_agent)?);
        headers.insert(REFERER, header_value(&config.referer)?);
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );

        let cookies = Arc::new(Jar::default());

        let client = reqwest::Client::builder()
            .default_headers(headers.clone())
            .cookie_provider(Arc::clone(&cookies))
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {e}")))?;

        let follow_client = reqwest::Client::builder()
            .default_headers(headers)
            .cookie_provider(cookies)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            follow_client,
        })
    }

    /// POST url-encoded form data.
    ///
    /// A 302 on the first attempt is treated as a cookie challenge: the jar
    /// has picked up the fresh cookies, so the identical POST is sent again
    /// and that second response is authoritative. Any non-2xx final status
    /// becomes [`EngineError::Protocol`].
    pub async fn post(
        &self,
        url: &str,
        form: &[(&str, String)],
        extra_headers: &[(&str, String)],
        timeout: Duration,
    ) -> EngineResult<HttpResponse> {
        let first = self
            .send(&self.client, url, form, extra_headers, timeout)
            .await?;

        let response = if first.status == 302 {
            tracing::debug!(
                "Cookie challenge (302) on {}, replaying POST",
                url.rsplit('/').next().unwrap_or(url)
            );
            let replay = self
                .send(&self.follow_client, url, form, extra_headers, timeout)
                .await?;
            if replay.final_url != url {
                tracing::debug!("Cookie challenge replay ended at {}", replay.final_url);
            }
            replay
        } else {
            first
        };

        if !response.is_success() {
            return Err(EngineError::Protocol {
                url: url.to_string(),
                status: response.status,
            });
        }

        Ok(response)
    }

    async fn send(
        &self,
        client: &reqwest::Client,
        url: &str,
        form: &[(&str, String)],
        extra_headers: &[(&str, String)],
        timeout: Duration,
    ) -> EngineResult<HttpResponse> {
        let mut builder = client.post(url).timeout(timeout).form(form);
        for (name, value) in extra_headers {
            builder = builder.header(*name, value.as_str());
        }

        let r = builder
            .send()
            .await
            .map_err(|e| EngineError::from_reqwest(url, e))?;
        let status = r.status().as_u16();
        let final_url = r.url().to_string();
        let body = r
            .text()
            .await
            .map_err(|e| EngineError::from_reqwest(url, e))?;

        Ok(HttpResponse {
            url: url.to_string(),
            final_url,
            status,
            body,
        })
    }
}

fn header_value(value: &str) -> EngineResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| EngineError::Config(format!("Invalid header value '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport_for(server: &MockServer) -> SessionTransport {
        let config = EngineConfig::default().with_base_url(&server.uri());
        SessionTransport::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_plain_post_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/echo"))
            .and(body_string_contains("state=27"))
            .and(header("x-requested-with", "XMLHttpRequest"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[1,2]"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let url = format!("{}/rest/echo", server.uri());
        let resp = transport
            .post(&url, &[("state", "27".into())], &[], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.final_url, url);
        let values: Vec<u32> = resp.json().unwrap();
        assert_eq!(values, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_cookie_challenge_replays_post_with_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/list"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("set-cookie", "JSESSIONID=abc; Path=/")
                    .insert_header("location", "/rest/list"),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/list"))
            .and(header("cookie", "JSESSIONID=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let url = format!("{}/rest/list", server.uri());
        let resp = transport
            .post(&url, &[("state", "27".into())], &[], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "[]");
    }

    #[tokio::test]
    async fn test_error_status_after_challenge_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/list"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/rest/list"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/list"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let url = format!("{}/rest/list", server.uri());
        let err = transport
            .post(&url, &[], &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Protocol { status: 405, .. }));
    }

    #[tokio::test]
    async fn test_extra_headers_override_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("referer", "http://example.test/custom"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let url = format!("{}/rest/any", server.uri());
        let resp = transport
            .post(
                &url,
                &[],
                &[("Referer", "http://example.test/custom".into())],
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(resp.body, "ok");
    }

    #[tokio::test]
    async fn test_timeout_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let url = format!("{}/rest/slow", server.uri());
        let err = transport
            .post(&url, &[], &[], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
