//! Error types for repo-harvest
//!
//! Errors are split along the same line the pipeline draws between failures:
//! - [`TransferError`] - failures of a single remote or local operation. These are
//!   isolated to the descriptor they happened on.
//! - [`PipelineError`] - failures that end the whole run (authentication, inventory
//!   read failures, internal faults).
//! - [`Error`] - the crate-level error returned from setup and convenience entry points.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for repo-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for repo-harvest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "parallelism")
        key: Option<String>,
    },

    /// A pipeline controller was asked to run a second time
    #[error("pipeline has already been started")]
    AlreadyStarted,

    /// Per-descriptor transfer failure surfaced outside the pipeline
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Pipeline-level failure
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a configuration error tied to a config key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Failure of a single fetch, delete, listing or local write operation
#[derive(Debug, Error)]
pub enum TransferError {
    /// Network or HTTP layer failure (connection reset, 5xx, malformed body)
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials were rejected; no other operation can succeed either
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The remote resource does not exist (any more)
    #[error("not found: {0}")]
    NotFound(String),

    /// The credentials are valid but lack permission for this resource
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The remote side throttled the request
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Local filesystem failure (disk full, permission denied)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was abandoned because the pipeline was cancelled
    #[error("operation cancelled")]
    Cancelled,
}

impl TransferError {
    /// Machine-readable classification of this error
    pub fn kind(&self) -> FailureKind {
        match self {
            TransferError::Transport(_) => FailureKind::Transport,
            TransferError::Auth(_) => FailureKind::Auth,
            TransferError::NotFound(_) => FailureKind::NotFound,
            TransferError::Forbidden(_) => FailureKind::Forbidden,
            TransferError::RateLimited(_) => FailureKind::RateLimited,
            TransferError::Io(_) => FailureKind::Io,
            TransferError::Cancelled => FailureKind::Cancelled,
        }
    }

    /// Whether this failure poisons the whole pipeline rather than one descriptor
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransferError::Auth(_))
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        TransferError::Transport(e.to_string())
    }
}

/// Serializable error classification carried in outcomes and events
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// See [`TransferError::Transport`]
    Transport,
    /// See [`TransferError::Auth`]
    Auth,
    /// See [`TransferError::NotFound`]
    NotFound,
    /// See [`TransferError::Forbidden`]
    Forbidden,
    /// See [`TransferError::RateLimited`]
    RateLimited,
    /// See [`TransferError::Io`]
    Io,
    /// See [`TransferError::Cancelled`]
    Cancelled,
}

impl FailureKind {
    /// Machine-readable error code
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport_error",
            FailureKind::Auth => "auth_error",
            FailureKind::NotFound => "not_found",
            FailureKind::Forbidden => "forbidden",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Io => "io_error",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure cause recorded in a [`TransferOutcome`](crate::types::TransferOutcome)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCause {
    /// Error classification
    pub kind: FailureKind,
    /// Human-readable message
    pub message: String,
}

impl From<&TransferError> for FailureCause {
    fn from(e: &TransferError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Failures that end a pipeline run
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum PipelineError {
    /// The inventory could not be read further; already-enqueued work still runs
    #[error("inventory read failed: {0}")]
    InventoryReadFailed(String),

    /// Authentication was rejected; nothing can succeed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The transfer channel was closed while the producer still held work
    #[error("transfer channel closed unexpectedly")]
    ChannelClosed,

    /// A worker or producer task panicked or was aborted
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// A descriptor attempted an illegal state transition
    #[error("invalid transfer transition: {0}")]
    InvalidTransition(String),
}

impl PipelineError {
    /// Whether the run must end in `Failed` (as opposed to a soft stop of enumeration)
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::InventoryReadFailed(_))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_transfer_error_maps_to_its_kind() {
        let cases = [
            (TransferError::Transport("reset".into()), FailureKind::Transport),
            (TransferError::Auth("bad token".into()), FailureKind::Auth),
            (TransferError::NotFound("gone".into()), FailureKind::NotFound),
            (TransferError::Forbidden("nope".into()), FailureKind::Forbidden),
            (TransferError::RateLimited("slow down".into()), FailureKind::RateLimited),
            (
                TransferError::Io(std::io::Error::other("disk full")),
                FailureKind::Io,
            ),
            (TransferError::Cancelled, FailureKind::Cancelled),
        ];

        for (error, kind) in cases {
            assert_eq!(error.kind(), kind, "wrong kind for {error}");
        }
    }

    #[test]
    fn only_auth_transfer_errors_are_fatal() {
        assert!(TransferError::Auth("401".into()).is_fatal());
        assert!(!TransferError::Transport("503".into()).is_fatal());
        assert!(!TransferError::NotFound("404".into()).is_fatal());
        assert!(!TransferError::Cancelled.is_fatal());
    }

    #[test]
    fn inventory_read_failure_is_not_fatal_but_auth_is() {
        assert!(!PipelineError::InventoryReadFailed("page 3".into()).is_fatal());
        assert!(PipelineError::Auth("401".into()).is_fatal());
        assert!(PipelineError::ChannelClosed.is_fatal());
    }

    #[test]
    fn failure_cause_keeps_kind_and_message() {
        let cause = FailureCause::from(&TransferError::Forbidden("repo is archived".into()));
        assert_eq!(cause.kind, FailureKind::Forbidden);
        assert_eq!(cause.message, "forbidden: repo is archived");
        assert_eq!(cause.to_string(), "forbidden: forbidden: repo is archived");
    }

    #[test]
    fn pipeline_error_serializes_with_type_tag() {
        let json = serde_json::to_value(PipelineError::Auth("bad token".into()))
            .expect("serialize failed");
        assert_eq!(json["type"], "auth");
        assert_eq!(json["message"], "bad token");
    }
}
