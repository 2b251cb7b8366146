//! Engine configuration and cache path resolution.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

pub const DEFAULT_BASE_URL: &str = "https://mahabhunakasha.mahabhumi.gov.in";
pub const DEFAULT_STATE_CODE: &str = "27";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                                      AppleWebKit/537.36 (KHTML, like Gecko) \
                                      Chrome/120.0.0.0 Safari/537.36";

/// Default cap on plots fetched per village.
pub const DEFAULT_MAX_PLOTS: usize = 9999;
/// Default number of concurrent plot fetches.
pub const DEFAULT_MAX_WORKERS: usize = 20;

const CACHE_DIR: &str = ".bhunaksha";
const CACHE_FILE: &str = "plot_cache.json";

/// Tunables for the engine. Built once at startup and handed to
/// [`crate::PlotEngine::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scheme and host of the map service, without trailing slash.
    pub base_url: String,
    pub state_code: String,
    pub user_agent: String,
    /// Referer for requests that don't need a location-specific one.
    pub referer: String,
    /// Timeout for hierarchy and plot-list requests.
    pub request_timeout_ms: u64,
    /// Timeout for a single plot geometry request.
    pub plot_timeout_ms: u64,
    pub max_attempts: u32,
    pub timeout_backoff_ms: u64,
    pub error_backoff_ms: u64,
    pub cache_path: PathBuf,
    /// Save the cache after every newly fetched plot.
    pub auto_persist: bool,
    /// Save the cache once at the end of each village batch.
    pub persist_after_batch: bool,
    pub default_max_plots: usize,
    pub default_max_workers: usize,
    /// Wall-clock budget for one village batch. `None` means unbounded.
    pub batch_deadline_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            state_code: DEFAULT_STATE_CODE.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: format!("{DEFAULT_BASE_URL}/{DEFAULT_STATE_CODE}/index.html"),
            request_timeout_ms: 15_000,
            plot_timeout_ms: 15_000,
            max_attempts: 3,
            timeout_backoff_ms: 2000,
            error_backoff_ms: 1000,
            cache_path: resolve_cache_path(None),
            auto_persist: false,
            persist_after_batch: true,
            default_max_plots: DEFAULT_MAX_PLOTS,
            default_max_workers: DEFAULT_MAX_WORKERS,
            batch_deadline_secs: None,
        }
    }
}

impl EngineConfig {
    /// Defaults with `BHUNAKSHA_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("BHUNAKSHA_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
            config.referer = format!("{}/{}/index.html", config.base_url, config.state_code);
        }
        if let Ok(flag) = std::env::var("BHUNAKSHA_AUTO_PERSIST") {
            config.auto_persist = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        config
    }

    /// Point the engine at a different service host (used by tests and
    /// mirrors). Also resets the default referer to that host.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self.referer = format!("{}/{}/index.html", self.base_url, self.state_code);
        self
    }

    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = path.into();
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(EngineError::Config(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.max_attempts == 0 {
            return Err(EngineError::Config("max_attempts must be at least 1".into()));
        }
        if self.default_max_workers == 0 {
            return Err(EngineError::Config(
                "default_max_workers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// REST root, e.g. `https://host/rest`.
    pub fn rest_url(&self) -> String {
        format!("{}/rest", self.base_url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn plot_timeout(&self) -> Duration {
        Duration::from_millis(self.plot_timeout_ms)
    }

    pub fn timeout_backoff(&self) -> Duration {
        Duration::from_millis(self.timeout_backoff_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn batch_deadline(&self) -> Option<Duration> {
        self.batch_deadline_secs.map(Duration::from_secs)
    }
}

/// Resolve the cache file path.
///
/// Order: explicit path, `BHUNAKSHA_CACHE`, an existing
/// `./.bhunaksha/plot_cache.json`, then `~/.bhunaksha/plot_cache.json`.
pub fn resolve_cache_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var("BHUNAKSHA_CACHE") {
        return PathBuf::from(env_path);
    }

    let cwd_cache = PathBuf::from(CACHE_DIR).join(CACHE_FILE);
    if cwd_cache.exists() {
        return cwd_cache;
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CACHE_DIR)
        .join(CACHE_FILE)
}
