//! Error types for the request scheduler.
//!
//! Failures of individual requests are values delivered to the caller
//! (`RequestFailure`), never panics or errors thrown out of the loops.

use thiserror::Error;

/// Failure classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// No connectivity, DNS or transport-level failure.
    Network,
    /// The transport did not answer within the request timeout.
    Timeout,
    /// Server signalled rate limiting (HTTP 429).
    RateLimited,
    /// 5xx response.
    Server,
    /// 4xx response other than 429.
    Client,
    /// Malformed batch or merge payload.
    Parse,
    /// The request was dropped before reaching a terminal outcome
    /// (eviction, `clear_all`, shutdown).
    Cancelled,
    Unknown,
}

impl FailureKind {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Server => "server",
            Self::Client => "client",
            Self::Parse => "parse",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure delivered to a request's caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} failure (status {status}): {message}")]
pub struct RequestFailure {
    pub kind: FailureKind,
    /// HTTP status if one was received, 0 otherwise.
    pub status: u16,
    pub message: String,
}

impl RequestFailure {
    pub fn new(kind: FailureKind, status: u16, message: impl Into<String>) -> Self {
        Self { kind, status, message: message.into() }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Cancelled, 0, message)
    }
}

/// Errors raised by scheduler operations themselves (not by requests).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("cannot build a batch from an empty request list")]
    EmptyBatch,

    #[error("cannot merge an empty request list")]
    EmptyMerge,

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("offline storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid policy configuration: {0}")]
    Policy(String),

    #[error("scheduler already started")]
    AlreadyStarted,

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

/// Errors from the persistence collaborator and the offline store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}
