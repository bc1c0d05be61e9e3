//! Wire messages for the sync endpoints.
//!
//! Request bodies are decoded through explicit schemas: a payload either
//! decodes completely or the whole request is rejected with
//! [`ProtocolError::Validation`].

use crate::entry::Entry;
use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response of `GET /sync/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Global hash over every live entry on the server.
    pub global_hash: String,
}

/// Body of `POST /sync/batch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Entries to upsert, applied in order.
    #[serde(default)]
    pub updates: Vec<Entry>,
    /// Ids to soft-delete, applied after all updates.
    #[serde(default)]
    pub deletions: Vec<Uuid>,
}

impl BatchRequest {
    /// Creates a batch request.
    pub fn new(updates: Vec<Entry>, deletions: Vec<Uuid>) -> Self {
        Self { updates, deletions }
    }

    /// Returns true if the batch carries no work.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletions.is_empty()
    }

    /// Number of items in the batch.
    pub fn len(&self) -> usize {
        self.updates.len() + self.deletions.len()
    }

    /// Decodes and validates a batch body.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_json(bytes)
    }

    /// Encodes the batch to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(ProtocolError::Encode)
    }
}

/// Response of `POST /sync/batch`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Number of entries written.
    pub updated: usize,
    /// Number of entries that existed and were soft-deleted.
    pub deleted: usize,
}

/// Body of the server-authored `POST /entries` and `PUT /entries/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDraft {
    /// Entry body; must not be empty.
    pub content: String,
    /// Optional tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl EntryDraft {
    /// Decodes and validates a draft body.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let draft: Self = decode_json(bytes)?;
        if draft.content.is_empty() {
            return Err(ProtocolError::validation("content is required"));
        }
        Ok(draft)
    }
}

/// Error body returned by every endpoint on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Short error summary.
    pub error: String,
    /// Optional detail, e.g. the validation failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    /// Creates an error body without details.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    /// Attaches details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Parses an entry id taken from a request path.
pub fn parse_entry_id(raw: &str) -> ProtocolResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ProtocolError::InvalidId(raw.to_string()))
}

fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::Validation(e.to_string()))
}
