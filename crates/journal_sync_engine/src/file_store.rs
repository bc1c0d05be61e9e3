//! File-backed replica store.
//!
//! The whole replica is kept in memory and written out as one JSON
//! snapshot after every mutation, using write-then-rename so a crash never
//! leaves a torn file behind.

use crate::error::{StoreError, StoreResult};
use crate::local_store::{EntryTable, LocalEntry, LocalStore, Snapshot, SyncCheckpoint, SyncStatus};
use chrono::{DateTime, Utc};
use journal_sync_protocol::Entry;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// A replica store persisted to a single JSON file.
///
/// # Example
///
/// ```rust,ignore
/// use journal_sync_engine::{FileLocalStore, LocalStore};
///
/// let store = FileLocalStore::open("replica.json")?;
/// for entry in store.get_all()? {
///     println!("{}", entry.entry.content);
/// }
/// ```
#[derive(Debug)]
pub struct FileLocalStore {
    path: PathBuf,
    table: RwLock<EntryTable>,
}

impl FileLocalStore {
    /// Opens the replica at `path`, creating an empty one if the file does
    /// not exist yet.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let table = if path.exists() {
            let bytes = fs::read(&path)?;
            let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
            let mut seen = HashSet::with_capacity(snapshot.entries.len());
            for entry in &snapshot.entries {
                if !seen.insert(entry.id()) {
                    return Err(StoreError::Corrupt(format!(
                        "duplicate entry {} in {}",
                        entry.id(),
                        path.display()
                    )));
                }
            }
            debug!(path = %path.display(), entries = seen.len(), "loaded replica");
            EntryTable::from_snapshot(snapshot)
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            EntryTable::default()
        };

        Ok(Self {
            path,
            table: RwLock::new(table),
        })
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `f` to a copy of the table, persists the copy and only then
    /// publishes it, so memory never runs ahead of disk.
    fn mutate<R>(&self, f: impl FnOnce(&mut EntryTable) -> R) -> StoreResult<R> {
        let mut table = self.table.write();
        let mut next = table.clone();
        let result = f(&mut next);
        self.persist(&next)?;
        *table = next;
        Ok(result)
    }

    fn persist(&self, table: &EntryTable) -> StoreResult<()> {
        let data = serde_json::to_vec(&table.snapshot())?;
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let mut file = File::create(&temp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

impl LocalStore for FileLocalStore {
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
        self.mutate(|t| t.insert(entry))
    }

    fn put_remote(&self, entry: Entry) -> StoreResult<bool> {
        self.mutate(|t| t.put_remote(entry))
    }

    fn mark_synced(
        &self,
        id: Uuid,
        last_updated: DateTime<Utc>,
        hash: Option<&str>,
    ) -> StoreResult<bool> {
        self.mutate(|t| t.mark_synced(id, last_updated, hash))
    }

    fn mark_trashed(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        self.mutate(|t| t.mark_trashed(id, now))
    }

    fn hard_delete(&self, id: Uuid) -> StoreResult<bool> {
        self.mutate(|t| t.remove(id))
    }

    fn get_by_status(&self, status: SyncStatus) -> StoreResult<Vec<LocalEntry>> {
        Ok(self.table.read().by_status(status))
    }

    fn checkpoint(&self) -> StoreResult<SyncCheckpoint> {
        Ok(self.table.read().checkpoint())
    }

    fn set_checkpoint(&self, checkpoint: SyncCheckpoint) -> StoreResult<()> {
        self.mutate(|t| t.set_checkpoint(checkpoint))
    }

    fn clear(&self) -> StoreResult<()> {
        self.mutate(EntryTable::clear)
    }
}
