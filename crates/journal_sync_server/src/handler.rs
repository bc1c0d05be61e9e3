//! Request handlers for the sync and entries endpoints.
//!
//! Handlers are synchronous and transport-agnostic: they take decoded path
//! segments and raw bodies, and return typed results. The HTTP layer in
//! `server.rs` and in-process callers share them.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::EntryStore;
use chrono::Utc;
use journal_sync_protocol::{
    parse_entry_id, BatchRequest, BatchResponse, Entry, EntryDraft, EntryPreview, ManifestEntry,
    StatusResponse,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Handler for sync and entries requests.
pub struct RequestHandler {
    config: ServerConfig,
    store: Arc<EntryStore>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(config: ServerConfig, store: Arc<EntryStore>) -> Self {
        Self { config, store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    /// `GET /sync/status`.
    pub fn handle_status(&self) -> ServerResult<StatusResponse> {
        Ok(StatusResponse {
            global_hash: self.store.global_hash()?,
        })
    }

    /// `GET /sync/manifest`. Empty when the store is empty.
    pub fn handle_manifest(&self) -> ServerResult<Vec<ManifestEntry>> {
        self.store.list()
    }

    /// `GET /sync/entries/{id}` and `GET /entries/{id}`.
    pub fn handle_get_entry(&self, raw_id: &str) -> ServerResult<Entry> {
        let id = parse_entry_id(raw_id)?;
        self.store.get(id)?.ok_or(ServerError::NotFound(id))
    }

    /// `POST /sync/batch`.
    ///
    /// The body is validated as a whole before anything is written. Updates
    /// are applied in order, then deletions. Application is not
    /// transactional: an I/O failure part-way leaves earlier items applied.
    pub fn handle_batch(&self, body: &[u8]) -> ServerResult<BatchResponse> {
        let request = BatchRequest::decode(body)?;
        if request.len() > self.config.max_batch_items {
            return Err(ServerError::InvalidRequest(format!(
                "too many items: {} > {}",
                request.len(),
                self.config.max_batch_items
            )));
        }

        let mut response = BatchResponse::default();
        for entry in request.updates {
            self.store.put(entry)?;
            response.updated += 1;
        }
        for id in request.deletions {
            if self.store.soft_delete(id)? {
                response.deleted += 1;
            } else {
                debug!(%id, "deletion of unknown entry ignored");
            }
        }

        info!(
            updated = response.updated,
            deleted = response.deleted,
            "batch applied"
        );
        Ok(response)
    }

    /// `GET /entries`.
    pub fn handle_list_entries(&self) -> ServerResult<Vec<EntryPreview>> {
        self.store.previews()
    }

    /// `POST /entries`.
    pub fn handle_create_entry(&self, body: &[u8]) -> ServerResult<Entry> {
        let draft = EntryDraft::decode(body)?;
        self.store.create(draft.content, draft.tags, Utc::now())
    }

    /// `PUT /entries/{id}`.
    pub fn handle_update_entry(&self, raw_id: &str, body: &[u8]) -> ServerResult<Entry> {
        let id = parse_entry_id(raw_id)?;
        let draft = EntryDraft::decode(body)?;
        self.store
            .update(id, draft.content, draft.tags, Utc::now())?
            .ok_or(ServerError::NotFound(id))
    }

    /// `DELETE /entries/{id}`.
    pub fn handle_delete_entry(&self, raw_id: &str) -> ServerResult<()> {
        let id = parse_entry_id(raw_id)?;
        if self.store.soft_delete(id)? {
            Ok(())
        } else {
            Err(ServerError::NotFound(id))
        }
    }
}
