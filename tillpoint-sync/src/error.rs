//! Error types for the sync engine.

use thiserror::Error;
use tillpoint_types::ConflictId;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The device is offline; the action was not attempted.
    #[error("offline: cannot sync without connectivity")]
    Offline,

    /// A sync run is already in progress.
    #[error("a sync run is already in progress")]
    AlreadyRunning,

    /// The named queue does not exist.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// The target queue is at capacity; the item was not admitted.
    #[error("queue {queue} is at maximum capacity ({max_size})")]
    QueueFull { queue: String, max_size: usize },

    /// The named queue item does not exist.
    #[error("queue item not found: {0}")]
    ItemNotFound(String),

    /// A manual retry was requested for an item that has not failed.
    #[error("queue item {0} is not in a failed state")]
    ItemNotFailed(String),

    /// The remote rejected the request with an HTTP status.
    #[error("remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// A network-level failure (DNS, connect, reset).
    #[error("network error: {0}")]
    Network(String),

    /// An operation exceeded its timeout.
    #[error("operation timed out")]
    Timeout,

    /// A payload could not be classified or validated. Never retried.
    #[error("unknown payload: {0}")]
    UnknownPayload(String),

    /// A conflict requires manual resolution before the record can proceed.
    #[error("conflict {0} requires manual resolution")]
    ConflictUnresolved(ConflictId),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] tillpoint_storage::StorageError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether retrying the failed action can plausibly succeed.
    ///
    /// Network-level failures, timeouts and remote 5xx responses are
    /// transient; malformed payloads, remote 4xx rejections and local
    /// storage/serialization failures are not.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Remote { status, .. } => *status >= 500,
            Self::Offline => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if let Some(status) = e.status() {
            Self::Remote {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            Self::Network(e.to_string())
        }
    }
}
