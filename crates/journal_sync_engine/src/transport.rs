//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use journal_sync_protocol::{global_hash, BatchRequest, BatchResponse, Entry, ManifestEntry};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// The four network operations the reconciliation engine needs.
///
/// Every operation is idempotent. Failures surface as [`SyncError`]; the
/// engine aborts the current run on any of them and leaves retrying to the
/// next trigger.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Fetches the server's global hash.
    async fn get_global_hash(&self) -> SyncResult<String>;

    /// Fetches the server manifest.
    async fn get_manifest(&self) -> SyncResult<Vec<ManifestEntry>>;

    /// Fetches one entry body. `Ok(None)` means the server does not have it.
    async fn get_entry_body(&self, id: Uuid) -> SyncResult<Option<Entry>>;

    /// Applies uploads then deletions on the server.
    async fn apply_batch(&self, batch: &BatchRequest) -> SyncResult<BatchResponse>;
}

/// Number of calls a [`MockTransport`] has served, per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportCalls {
    /// `get_global_hash` calls.
    pub status: usize,
    /// `get_manifest` calls.
    pub manifest: usize,
    /// `get_entry_body` calls.
    pub fetch: usize,
    /// `apply_batch` calls.
    pub batch: usize,
}

/// An in-memory server for testing.
///
/// Behaves like the real server (trusting upserts, deletions counted only
/// when the entry existed) and records how often each operation ran.
#[derive(Debug)]
pub struct MockTransport {
    entries: Mutex<BTreeMap<Uuid, Entry>>,
    calls: Mutex<TransportCalls>,
    connected: AtomicBool,
    fail_batches: AtomicBool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a connected mock with no entries.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(TransportCalls::default()),
            connected: AtomicBool::new(true),
            fail_batches: AtomicBool::new(false),
        }
    }

    /// Stores an entry server-side.
    pub fn insert(&self, entry: Entry) {
        self.entries.lock().insert(entry.id, entry);
    }

    /// Removes an entry server-side, out of band.
    pub fn remove(&self, id: Uuid) -> Option<Entry> {
        self.entries.lock().remove(&id)
    }

    /// Returns the server copy of an entry.
    pub fn entry(&self, id: Uuid) -> Option<Entry> {
        self.entries.lock().get(&id).cloned()
    }

    /// Returns all server entries in id order.
    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().values().cloned().collect()
    }

    /// Returns the call counters.
    pub fn calls(&self) -> TransportCalls {
        *self.calls.lock()
    }

    /// Resets the call counters.
    pub fn reset_calls(&self) {
        *self.calls.lock() = TransportCalls::default();
    }

    /// Sets the connected state. A disconnected mock fails every call.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes `apply_batch` fail while set.
    pub fn set_fail_batches(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }

    fn check_connected(&self) -> SyncResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("connection refused"))
        }
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn get_global_hash(&self) -> SyncResult<String> {
        self.calls.lock().status += 1;
        self.check_connected()?;
        Ok(global_hash(self.entries.lock().values()))
    }

    async fn get_manifest(&self) -> SyncResult<Vec<ManifestEntry>> {
        self.calls.lock().manifest += 1;
        self.check_connected()?;
        Ok(self.entries.lock().values().map(Entry::manifest).collect())
    }

    async fn get_entry_body(&self, id: Uuid) -> SyncResult<Option<Entry>> {
        self.calls.lock().fetch += 1;
        self.check_connected()?;
        Ok(self.entry(id))
    }

    async fn apply_batch(&self, batch: &BatchRequest) -> SyncResult<BatchResponse> {
        self.calls.lock().batch += 1;
        self.check_connected()?;
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(SyncError::ServerError {
                status: 500,
                message: "Internal server error".into(),
            });
        }

        let mut entries = self.entries.lock();
        for entry in &batch.updates {
            entries.insert(entry.id, entry.clone());
        }
        let deleted = batch
            .deletions
            .iter()
            .filter(|id| entries.remove(*id).is_some())
            .count();
        Ok(BatchResponse {
            updated: batch.updates.len(),
            deleted,
        })
    }
}
