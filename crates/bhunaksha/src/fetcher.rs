//! Single-plot geometry fetch: cache first, then the network with bounded
//! retries.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cache::GeometryCache;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::info::{extract_report_url, parse_info_text};
use crate::transport::SessionTransport;
use crate::types::{LocationCode, PlotKey, PlotRecord};

const PLOT_INFO_ENDPOINT: &str = "MapInfo/getPlotInfo";

/// Result of looking up one plot.
///
/// [`PlotFetcher::get`] collapses everything except `Found` into `None`;
/// [`PlotFetcher::lookup`] keeps the distinction for callers that care why
/// a plot is missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlotOutcome {
    Found(PlotRecord),
    /// The service answered but had no geometry for this plot.
    NotFound,
    /// The service answered with something that isn't plot JSON.
    ParseFailed { reason: String },
    /// Every attempt failed with a network, timeout, or status error.
    Exhausted { attempts: u32, last_error: String },
    Cancelled,
}

impl PlotOutcome {
    pub fn into_record(self) -> Option<PlotRecord> {
        match self {
            PlotOutcome::Found(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, PlotOutcome::Found(_))
    }
}

/// Fetches and parses one plot's geometry and ownership metadata.
#[derive(Clone)]
pub struct PlotFetcher {
    transport: SessionTransport,
    cache: Arc<GeometryCache>,
    url: String,
    state_code: String,
    timeout: Duration,
    max_attempts: u32,
    timeout_backoff: Duration,
    error_backoff: Duration,
}

impl PlotFetcher {
    pub fn new(
        transport: SessionTransport,
        cache: Arc<GeometryCache>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            transport,
            cache,
            url: format!("{}/{PLOT_INFO_ENDPOINT}", config.rest_url()),
            state_code: config.state_code.clone(),
            timeout: config.plot_timeout(),
            max_attempts: config.max_attempts.max(1),
            timeout_backoff: config.timeout_backoff(),
            error_backoff: config.error_backoff(),
        }
    }

    /// The plot record, or `None` if it doesn't exist or couldn't be fetched.
    pub async fn get(&self, location: &LocationCode, plot_no: &str) -> Option<PlotRecord> {
        self.lookup(location, plot_no, &CancellationToken::new())
            .await
            .into_record()
    }

    /// Look up a plot, reporting why it is missing when it is.
    ///
    /// Cache hits return without touching the network. Misses are fetched
    /// up to `max_attempts` times; timeouts back off longer than other
    /// transient errors. Parse failures and missing geometry are final.
    /// Negative results are never cached.
    pub async fn lookup(
        &self,
        location: &LocationCode,
        plot_no: &str,
        cancel: &CancellationToken,
    ) -> PlotOutcome {
        let key = PlotKey::new(location, plot_no);
        if let Some(record) = self.cache.get(&key) {
            tracing::debug!("Cache hit for {key}");
            return PlotOutcome::Found(record);
        }

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PlotOutcome::Cancelled,
                r = self.request(&key) => r,
            };

            let body = match result {
                Ok(body) => body,
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        "Plot {key}: attempt {attempt}/{} failed: {e}",
                        self.max_attempts
                    );
                    let backoff = if e.is_timeout() {
                        self.timeout_backoff
                    } else {
                        self.error_backoff
                    };
                    last_error = e.to_string();
                    if attempt < self.max_attempts {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return PlotOutcome::Cancelled,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Plot {key}: unusable response: {e}");
                    return PlotOutcome::ParseFailed {
                        reason: e.to_string(),
                    };
                }
            };

            return match record_from_body(&key, &body) {
                Some(record) => PlotOutcome::Found(self.store(key, record).await),
                None => {
                    tracing::debug!("Plot {key}: no geometry in response");
                    PlotOutcome::NotFound
                }
            };
        }

        tracing::warn!(
            "Plot {key}: giving up after {} attempts",
            self.max_attempts
        );
        PlotOutcome::Exhausted {
            attempts: self.max_attempts,
            last_error,
        }
    }

    async fn request(&self, key: &PlotKey) -> EngineResult<Value> {
        let form = [
            ("giscode", key.giscode.clone()),
            ("plotno", key.plot_no.clone()),
            ("state", self.state_code.clone()),
        ];
        let response = self
            .transport
            .post(&self.url, &form, &[], self.timeout)
            .await?;
        response.json()
    }

    /// Insert into the cache and write through if configured. If another
    /// worker stored the same key first, its record is returned instead.
    async fn store(&self, key: PlotKey, record: PlotRecord) -> PlotRecord {
        if !self.cache.put(key.clone(), record.clone()) {
            return self.cache.get(&key).unwrap_or(record);
        }
        if self.cache.auto_persist() {
            if let Err(e) = self.cache.save_async().await {
                tracing::error!("Failed to persist plot cache: {e}");
            }
        }
        record
    }
}

/// Build a record from a `getPlotInfo` body. `None` when there is no
/// geometry.
fn record_from_body(key: &PlotKey, body: &Value) -> Option<PlotRecord> {
    let the_geom = body.get("the_geom")?.as_str()?.trim();
    if the_geom.is_empty() {
        return None;
    }

    let parsed_records = body
        .get("info")
        .and_then(Value::as_str)
        .map(parse_info_text)
        .unwrap_or_default();
    let report_url = body
        .get("infoLinks")
        .and_then(Value::as_str)
        .and_then(extract_report_url);

    Some(PlotRecord {
        giscode: key.giscode.clone(),
        plot_no: key.plot_no.clone(),
        the_geom: the_geom.to_string(),
        parsed_records,
        report_url,
    })
}
