//! Huginn error types

use std::time::Duration;

/// Coarse classification used by the retry manager to pick a backoff
/// multiplier and decide whether an error is worth retrying at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network blips, 5xx, timeouts. Retried with the default multiplier.
    Transient,
    /// Upstream quota exhausted. Retried with the most aggressive backoff.
    QuotaExceeded,
    /// Upstream throttling. Retried with a medium backoff.
    RateLimited,
    /// Not found, forbidden, malformed input. Never retried.
    Permanent,
}

/// Huginn error types
#[derive(Debug, thiserror::Error)]
pub enum HuginnError {
    // Upstream/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("quota exceeded: {message}")]
    QuotaExceeded {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    // Retrieval errors
    /// A single download strategy failed in a way that may not recur
    /// with a different strategy (extractor crash, bot check, process
    /// timeout). Never retried within the same strategy; the fallback
    /// chain moves on instead.
    #[error("strategy '{strategy}' failed: {message}")]
    Strategy { strategy: String, message: String },

    /// Every strategy in the fallback chain failed. `message` lists each one.
    #[error("all strategies failed for {resource_id}: {message}")]
    AllStrategiesFailed {
        resource_id: String,
        message: String,
    },

    #[error("strategy does not support this operation")]
    Unsupported,

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl HuginnError {
    /// Classify the error for retry purposes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HuginnError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            HuginnError::RateLimited { .. } => ErrorKind::RateLimited,
            HuginnError::Http(_) | HuginnError::Timeout(_) | HuginnError::Io(_) => {
                ErrorKind::Transient
            }
            HuginnError::Api { status, .. } if *status >= 500 || *status == 408 => {
                ErrorKind::Transient
            }
            _ => ErrorKind::Permanent,
        }
    }

    /// Whether a retry of the same operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() != ErrorKind::Permanent
    }

    /// Upstream-provided hint for how long to wait before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            HuginnError::RateLimited { retry_after }
            | HuginnError::QuotaExceeded { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the caller can recover by waiting or trying again later.
    ///
    /// Quota and rate-limit errors are recoverable even though they are
    /// surfaced to the caller; permanent errors are not.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            HuginnError::NotFound(_)
                | HuginnError::Forbidden(_)
                | HuginnError::AuthenticationFailed
                | HuginnError::InvalidInput(_)
                | HuginnError::Configuration(_)
        )
    }
}

#[cfg(feature = "youtube-api")]
impl From<reqwest::Error> for HuginnError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HuginnError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            HuginnError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            HuginnError::Http(err.to_string())
        }
    }
}

/// Result type alias for Huginn operations
pub type Result<T> = std::result::Result<T, HuginnError>;
