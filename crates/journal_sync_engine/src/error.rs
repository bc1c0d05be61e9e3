//! Error types for the sync engine.

use journal_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for local store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A request exceeded the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("server error {status}: {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body.
        message: String,
    },

    /// A payload failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// The server answered with a body the engine cannot read.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The replica is offline.
    #[error("Cannot {operation} while offline")]
    Offline {
        /// The refused operation, e.g. "force refresh".
        operation: &'static str,
    },

    /// Local store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Internal error (e.g. a background task died).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a later attempt may succeed without any change on
    /// this side.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Timeout => true,
            Self::ServerError { status, .. } => *status >= 500,
            Self::Offline { .. } => true,
            _ => false,
        }
    }

    /// Returns true if this is a transport-level failure (network, timeout
    /// or non-2xx status).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout | Self::ServerError { .. }
        )
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Encode(e) => Self::Internal(e.to_string()),
            other => Self::Validation(other.to_string()),
        }
    }
}

/// Errors raised by a local replica store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data violates an invariant.
    #[error("corrupt store: {0}")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(SyncError::transport_retryable("reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad url").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::ServerError {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!SyncError::ServerError {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!SyncError::Validation("x".into()).is_retryable());
    }

    #[test]
    fn offline_message() {
        let err = SyncError::Offline {
            operation: "force refresh",
        };
        assert_eq!(err.to_string(), "Cannot force refresh while offline");
    }

    #[test]
    fn store_error_converts() {
        let err: SyncError = StoreError::Corrupt("dup".into()).into();
        assert!(matches!(err, SyncError::Store(_)));
        assert!(!err.is_transport());
    }

    #[test]
    fn protocol_error_is_validation() {
        let err: SyncError = ProtocolError::validation("empty").into();
        assert!(matches!(err, SyncError::Validation(_)));
    }
}
