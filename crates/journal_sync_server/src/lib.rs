//! # Journal Sync Server
//!
//! Server-side replica for journal sync.
//!
//! This crate provides:
//! - A durable file-per-entry store with soft delete into a trash area
//! - Request handlers for the `/sync` and `/entries` endpoints
//! - Pluggable bearer-token authorization
//! - An axum router exposing the handlers over HTTP
//!
//! # Architecture
//!
//! The server is a trusting last-writer store, not an authority: uploaded
//! entries are persisted exactly as supplied, including `lastUpdated` and
//! `hash`. Clients decide what to upload and download by comparing the
//! global hash and the manifest served here.
//!
//! ```text
//! <data_dir>/entries/
//! ├─ <id>.json         # one document per live entry
//! └─ .trash/<id>.json  # soft-deleted documents, recoverable
//! ```
//!
//! # Endpoints
//!
//! - `GET /sync/status` → `{globalHash}`
//! - `GET /sync/manifest` → `[{id, hash?, lastUpdated}]`
//! - `GET /sync/entries/{id}` → entry or 404
//! - `POST /sync/batch {updates, deletions}` → `{updated, deleted}`

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod server;
mod store;

pub use auth::{token_digest, AllowAll, Authorizer, TokenDigestAuthorizer};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use server::SyncServer;
pub use store::{EntryStore, StoreStats};
