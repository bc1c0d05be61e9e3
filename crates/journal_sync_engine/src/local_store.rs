//! Client-side replica store.
//!
//! A [`LocalStore`] holds the replica's entries together with their
//! replica-local sync status, plus the last sync checkpoint. Every
//! implementation keeps a status index so `get_by_status` never scans the
//! whole table.

use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use journal_sync_protocol::{Entry, Fingerprinted};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// Replica-local sync status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Content equals the last known server content.
    Synced,
    /// A local mutation has not been acknowledged by the server.
    Pending,
    /// Reserved. Never produced by the engine.
    Error,
}

/// An entry as held by a client replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalEntry {
    /// The replicated entry.
    #[serde(flatten)]
    pub entry: Entry,
    /// True once deleted locally.
    #[serde(default)]
    pub trashed: bool,
    /// Sync status.
    pub sync_status: SyncStatus,
}

impl LocalEntry {
    /// Wraps a server copy as a synced, live entry.
    pub fn synced(entry: Entry) -> Self {
        Self {
            entry,
            trashed: false,
            sync_status: SyncStatus::Synced,
        }
    }

    /// Wraps a locally authored entry as pending.
    pub fn pending(entry: Entry) -> Self {
        Self {
            entry,
            trashed: false,
            sync_status: SyncStatus::Pending,
        }
    }

    /// The entry id.
    pub fn id(&self) -> Uuid {
        self.entry.id
    }

    /// Returns true if the entry is live and synced.
    pub fn is_clean(&self) -> bool {
        !self.trashed && self.sync_status == SyncStatus::Synced
    }

    /// Returns true if the entry carries local work the server has not seen.
    pub fn is_dirty(&self) -> bool {
        self.trashed || self.sync_status == SyncStatus::Pending
    }
}

impl Fingerprinted for LocalEntry {
    fn id(&self) -> Uuid {
        self.entry.id
    }

    fn hash(&self) -> Option<&str> {
        self.entry.hash.as_deref()
    }
}

/// Outcome of the last completed sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoint {
    /// When the last sync completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Server global hash observed at that time, if it could be fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_hash: Option<String>,
}

/// Storage for a client replica.
///
/// Implementations must make each method atomic with respect to the others.
pub trait LocalStore: Send + Sync {
    /// Live entries, newest `creationDate` first.
    fn get_all(&self) -> StoreResult<Vec<LocalEntry>>;

    /// All entries including trashed ones, in id order.
    fn get_all_including_trashed(&self) -> StoreResult<Vec<LocalEntry>>;

    /// Point lookup, trashed entries included.
    fn get(&self, id: Uuid) -> StoreResult<Option<LocalEntry>>;

    /// Inserts or replaces an entry.
    fn put(&self, entry: LocalEntry) -> StoreResult<()>;

    /// Stores a server copy as synced unless the local copy is pending.
    ///
    /// Returns false if the local copy was kept.
    fn put_remote(&self, entry: Entry) -> StoreResult<bool>;

    /// Marks an uploaded entry synced if it still carries the uploaded
    /// `lastUpdated` and hash. Returns false if it changed meanwhile.
    fn mark_synced(
        &self,
        id: Uuid,
        last_updated: DateTime<Utc>,
        hash: Option<&str>,
    ) -> StoreResult<bool>;

    /// Trashes an entry: `trashed = true`, `pending`, `lastUpdated` bumped
    /// to `now` (never backwards). Returns false if absent.
    fn mark_trashed(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Removes an entry irreversibly. Returns false if absent.
    fn hard_delete(&self, id: Uuid) -> StoreResult<bool>;

    /// Entries with the given status, in id order.
    fn get_by_status(&self, status: SyncStatus) -> StoreResult<Vec<LocalEntry>>;

    /// The last sync checkpoint.
    fn checkpoint(&self) -> StoreResult<SyncCheckpoint>;

    /// Replaces the sync checkpoint.
    fn set_checkpoint(&self, checkpoint: SyncCheckpoint) -> StoreResult<()>;

    /// Drops every entry and the checkpoint.
    fn clear(&self) -> StoreResult<()>;
}

/// Serialized form of a replica.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Snapshot {
    #[serde(default)]
    pub(crate) checkpoint: SyncCheckpoint,
    #[serde(default)]
    pub(crate) entries: Vec<LocalEntry>,
}

/// Id-ordered entry table with a status index.
#[derive(Debug, Clone, Default)]
pub(crate) struct EntryTable {
    entries: BTreeMap<Uuid, LocalEntry>,
    by_status: HashMap<SyncStatus, BTreeSet<Uuid>>,
    checkpoint: SyncCheckpoint,
}

impl EntryTable {
    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut table = Self {
            checkpoint: snapshot.checkpoint,
            ..Self::default()
        };
        for entry in snapshot.entries {
            table.insert(entry);
        }
        table
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            checkpoint: self.checkpoint.clone(),
            entries: self.entries.values().cloned().collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn live_sorted(&self) -> Vec<LocalEntry> {
        let mut live: Vec<LocalEntry> = self
            .entries
            .values()
            .filter(|e| !e.trashed)
            .cloned()
            .collect();
        live.sort_by(|a, b| {
            b.entry
                .creation_date
                .cmp(&a.entry.creation_date)
                .then_with(|| a.id().cmp(&b.id()))
        });
        live
    }

    pub(crate) fn all(&self) -> Vec<LocalEntry> {
        self.entries.values().cloned().collect()
    }

    pub(crate) fn get(&self, id: Uuid) -> Option<LocalEntry> {
        self.entries.get(&id).cloned()
    }

    pub(crate) fn insert(&mut self, entry: LocalEntry) {
        let id = entry.id();
        let status = entry.sync_status;
        if let Some(previous) = self.entries.insert(id, entry) {
            self.unindex(id, previous.sync_status);
        }
        self.by_status.entry(status).or_default().insert(id);
    }

    pub(crate) fn put_remote(&mut self, entry: Entry) -> bool {
        let pending = self
            .entries
            .get(&entry.id)
            .is_some_and(|e| e.sync_status == SyncStatus::Pending);
        if pending {
            return false;
        }
        self.insert(LocalEntry::synced(entry));
        true
    }

    pub(crate) fn mark_synced(
        &mut self,
        id: Uuid,
        last_updated: DateTime<Utc>,
        hash: Option<&str>,
    ) -> bool {
        let Some(current) = self.entries.get(&id) else {
            return false;
        };
        if current.trashed
            || current.entry.last_updated != last_updated
            || current.entry.hash.as_deref() != hash
        {
            return false;
        }
        let mut updated = current.clone();
        updated.sync_status = SyncStatus::Synced;
        self.insert(updated);
        true
    }

    pub(crate) fn mark_trashed(&mut self, id: Uuid, now: DateTime<Utc>) -> bool {
        let Some(current) = self.entries.get(&id) else {
            return false;
        };
        let mut updated = current.clone();
        updated.trashed = true;
        updated.sync_status = SyncStatus::Pending;
        updated.entry.last_updated = now.max(updated.entry.last_updated);
        self.insert(updated);
        true
    }

    pub(crate) fn remove(&mut self, id: Uuid) -> bool {
        match self.entries.remove(&id) {
            Some(previous) => {
                self.unindex(id, previous.sync_status);
                true
            }
            None => false,
        }
    }

    pub(crate) fn by_status(&self, status: SyncStatus) -> Vec<LocalEntry> {
        self.by_status
            .get(&status)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.entries.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn checkpoint(&self) -> SyncCheckpoint {
        self.checkpoint.clone()
    }

    pub(crate) fn set_checkpoint(&mut self, checkpoint: SyncCheckpoint) {
        self.checkpoint = checkpoint;
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    fn unindex(&mut self, id: Uuid, status: SyncStatus) {
        if let Some(ids) = self.by_status.get_mut(&status) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_status.remove(&status);
            }
        }
    }
}

/// In-memory replica store.
///
/// Useful for tests and for replicas that do not outlive the process.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    table: RwLock<EntryTable>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, trashed ones included.
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalStore for MemoryLocalStore {
    fn get_all(&self) -> StoreResult<Vec<LocalEntry>> {
        Ok(self.table.read().live_sorted())
    }

    fn get_all_including_trashed(&self) -> StoreResult<Vec<LocalEntry>> {
        Ok(self.table.read().all())
    }

    fn get(&self, id: Uuid) -> StoreResult<Option<LocalEntry>> {
        Ok(self.table.read().get(id))
    }

    fn put(&self, entry: LocalEntry) -> StoreResult<()> {
        self.table.write().insert(entry);
        Ok(())
    }

    fn put_remote(&self, entry: Entry) -> StoreResult<bool> {
        Ok(self.table.write().put_remote(entry))
    }

    fn mark_synced(
        &self,
        id: Uuid,
        last_updated: DateTime<Utc>,
        hash: Option<&str>,
    ) -> StoreResult<bool> {
        Ok(self.table.write().mark_synced(id, last_updated, hash))
    }

    fn mark_trashed(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        Ok(self.table.write().mark_trashed(id, now))
    }

    fn hard_delete(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.table.write().remove(id))
    }

    fn get_by_status(&self, status: SyncStatus) -> StoreResult<Vec<LocalEntry>> {
        Ok(self.table.read().by_status(status))
    }

    fn checkpoint(&self) -> StoreResult<SyncCheckpoint> {
        Ok(self.table.read().checkpoint())
    }

    fn set_checkpoint(&self, checkpoint: SyncCheckpoint) -> StoreResult<()> {
        self.table.write().set_checkpoint(checkpoint);
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        self.table.write().clear();
        Ok(())
    }
}
