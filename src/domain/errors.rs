use chrono::{DateTime, Utc};
use thiserror::Error;

/// Terminal outcomes of a transport call, surfaced after the internal retry
/// budget is spent. Transient classes are absorbed and retried inside the
/// transport; callers only ever see these.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("authentication rejected (HTTP {status})")]
    Auth { status: u16 },

    #[error("rate limited (HTTP 429)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("server error (HTTP {status})")]
    Server { status: u16 },

    #[error("network error: {detail}")]
    Network { detail: String },

    #[error("request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

impl TransportError {
    /// Whether another attempt may change the outcome. Credential problems
    /// never recover on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Auth { .. })
    }
}

/// Errors from the per-stream history store.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("corrupt history for stream {stream}: {detail}")]
    Corrupt { stream: String, detail: String },

    #[error("stale timestamp for stream {stream}: {rejected} is older than latest {latest}")]
    StaleTimestamp {
        stream: String,
        rejected: DateTime<Utc>,
        latest: DateTime<Utc>,
    },

    #[error("history I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid setup detected before any work is dispatched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    #[error("at least one source is required")]
    NoSources,

    #[error("batch ceiling must be at least 1")]
    InvalidBatchCeiling,

    #[error("batch concurrency must be at least 1")]
    InvalidBatchConcurrency,
}
