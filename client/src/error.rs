//! Errors of the sync client.

use tether_engine::{RejectedRecord, SchemaVersion};

/// Everything a sync cycle can fail with.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Another cycle holds the lock
    #[error("a sync cycle is already running")]
    Busy,

    #[error("sync cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Network(String),

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("server responded with {status}: {message}")]
    Server { status: u16, message: String },

    /// The app has to be updated before it can sync again
    #[error("local schema {local} cannot sync with the remote{}", remote_version(.remote))]
    SchemaIncompatible {
        local: SchemaVersion,
        remote: Option<SchemaVersion>,
    },

    /// The remote changed records after our last pull; the next pull fetches them
    #[error("push rejected for {} record(s)", .rejected.len())]
    PushRejected { rejected: Vec<RejectedRecord> },

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Engine(#[from] tether_engine::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

fn remote_version(remote: &Option<SchemaVersion>) -> String {
    remote
        .map(|v| format!(" (remote schema {v})"))
        .unwrap_or_default()
}

impl SyncError {
    /// Transient failure worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Timeout { .. } => true,
            SyncError::Server { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }

    /// Outcome of normal operation rather than a fault.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            SyncError::Busy | SyncError::Cancelled | SyncError::PushRejected { .. }
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout {
                operation: "request",
            }
        } else if err.is_decode() {
            SyncError::Protocol(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, SyncError>;
