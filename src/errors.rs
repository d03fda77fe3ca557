//! Coordination Ring Error Hierarchy
//!
//! Errors are split by who can act on them: validation failures go straight
//! back to the caller, store failures are classified as transient (retried by
//! the store-call helper) or terminal, and cancellation ends a call or a
//! watcher session.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

/// Result type returned by [`crate::RingStore`] implementations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller supplied arguments that can never succeed
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Backing store failures that survived the retry policy
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The ambient cancellation token fired before the call completed
    #[error("Operation cancelled")]
    Cancelled,

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Item keepalive at or below the floor
    #[error("keepalive {ttl}s is too short, must be greater than {min}s")]
    KeepaliveTooShort { ttl: i64, min: i64 },

    /// Interval below the floor
    #[error("interval {secs}s is too short, must be at least {min}s")]
    IntervalTooShort { secs: i64, min: i64 },

    #[error("subscription name must not be empty")]
    EmptyName,

    #[error("subscription items must be greater than 0, got {0}")]
    InvalidItems(i64),

    #[error("interval schedule and cron schedule are mutually exclusive")]
    ConflictingSchedules,

    #[error("subscription requires an interval schedule or a cron schedule")]
    MissingSchedule,

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },
}

/// Errors reported by the backing store adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Endpoint unreachable or leader election in progress
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A single store call exceeded its deadline
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    /// The lease expired or was revoked
    #[error("Lease {0} not found")]
    LeaseNotFound(i64),

    /// The store closed a watch stream
    #[error("Watch closed: {0}")]
    WatchClosed(String),

    /// The requested watch revision is no longer retained
    #[error("Watch revision {revision} has been compacted")]
    Compacted { revision: i64 },

    #[error("Store internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Transient faults that are worth retrying at the call site.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        Error::Fatal(format!("background task failed: {err}"))
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Fatal(format!("metrics: {err}"))
    }
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Faults a watcher is expected to ride out by restarting its session:
    /// retryable store errors and interrupted watches.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Store(e) => {
                e.is_retryable() || matches!(e, StoreError::WatchClosed(_) | StoreError::Compacted { .. })
            }
            _ => false,
        }
    }
}
