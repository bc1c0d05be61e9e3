//! # Journal Sync Engine
//!
//! Client side of journal replication.
//!
//! This crate provides:
//! - A replica store with a status index (in-memory and JSON-file backed)
//! - The sync transport abstraction, with an HTTP implementation bounded by
//!   a per-request timeout
//! - The reconciliation engine (`sync` and the destructive `force_refresh`)
//! - A coordinator that enforces single-flight execution, tracks
//!   connectivity, runs a periodic timer and notifies subscribers
//!
//! ## Architecture
//!
//! A `sync` run compares global hashes first and stops there when the
//! replica is clean and matches the server. Otherwise it diffs the server
//! manifest against the replica:
//!
//! 1. Server-only entries are downloaded
//! 2. Clean entries whose hash differs go to the side with the newer
//!    `lastUpdated` (ties do nothing)
//! 3. Pending entries are uploaded and trashed entries deleted, in one batch
//! 4. Synced entries the server no longer has are purged locally
//!
//! ## Key Invariants
//!
//! - At most one run per replica is in flight
//! - Unsent local edits are never marked synced
//! - A failed run leaves every entry in its last persisted state

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod coordinator;
mod engine;
mod error;
mod file_store;
mod http;
mod local_store;
mod transport;

pub use config::{SyncConfig, DEFAULT_SYNC_INTERVAL, DEFAULT_TIMEOUT};
pub use coordinator::{SharedSyncResult, SubscriptionId, SyncCoordinator};
pub use engine::{ReconciliationEngine, RefreshReport, SyncReport, SyncStats};
pub use error::{StoreError, StoreResult, SyncError, SyncResult};
pub use file_store::FileLocalStore;
pub use http::{
    HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpTransport, LoopbackClient,
    LoopbackServer, ReqwestClient,
};
pub use local_store::{LocalEntry, LocalStore, MemoryLocalStore, SyncCheckpoint, SyncStatus};
pub use transport::{MockTransport, SyncTransport, TransportCalls};
