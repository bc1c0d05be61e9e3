//! Error types for protocol decoding and validation.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or validating wire payloads.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The payload did not match the expected schema.
    #[error("invalid payload: {0}")]
    Validation(String),

    /// An entry identifier was not a valid UUID.
    #[error("invalid entry id: {0}")]
    InvalidId(String),

    /// A message could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
