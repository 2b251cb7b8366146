//! Error types for the plot geometry engine.

use std::path::PathBuf;

/// All errors that can occur while talking to the map service or the cache.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected HTTP status {status} from {url}")]
    Protocol { url: String, status: u16 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Cache I/O error at {}: {source}", path.display())]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the failure was a request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }

    /// Whether a retry of the same request might succeed.
    ///
    /// Parse and cache failures are deterministic; retrying them only burns
    /// time.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout { .. } | EngineError::Network(_) | EngineError::Protocol { .. }
        )
    }

    pub(crate) fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EngineError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = e.status() {
            EngineError::Protocol {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            EngineError::Network(format!("{url}: {e}"))
        }
    }

    pub(crate) fn cache_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::CacheIo {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
