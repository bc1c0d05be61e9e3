//! Error types for the sync server.

use journal_sync_protocol::ProtocolError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Payload failed schema validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ProtocolError),

    /// Unknown entry id.
    #[error("entry not found: {0}")]
    NotFound(Uuid),

    /// Authorization failed.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Stored document could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::Validation(_)
                | ServerError::NotFound(_)
                | ServerError::NotAuthorized(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::Serialization(_) | ServerError::Internal(_) | ServerError::Io(_)
        )
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) | ServerError::Validation(_) => 400,
            ServerError::NotAuthorized(_) => 401,
            ServerError::NotFound(_) => 404,
            ServerError::Serialization(_) | ServerError::Internal(_) | ServerError::Io(_) => 500,
        }
    }
}
