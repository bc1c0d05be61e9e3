//! Durable file-per-entry store.
//!
//! Each live entry is one JSON document named `<id>.json`. Soft delete is a
//! single `rename` into the `.trash` directory, so a listing observes an
//! entry either as present or as absent, never both. Writes go through a
//! temporary file and a rename for the same reason.
//!
//! Operations on one id serialize on a lock striped by id, so the lock
//! table stays a fixed size. Listing takes no locks.

use crate::error::{ServerError, ServerResult};
use chrono::{DateTime, Utc};
use journal_sync_protocol::{global_hash, Entry, EntryPreview, ManifestEntry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const ENTRIES_DIR: &str = "entries";
const TRASH_DIR: &str = ".trash";
const DOCUMENT_EXT: &str = "json";
const LOCK_STRIPES: usize = 64;

/// On-disk form of an entry. The id is the file name.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    creation_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<String>>,
    content: String,
}

impl From<&Entry> for StoredDocument {
    fn from(entry: &Entry) -> Self {
        Self {
            creation_date: Some(entry.creation_date),
            last_updated: Some(entry.last_updated),
            hash: entry.hash.clone(),
            tags: entry.tags.clone(),
            content: entry.content.clone(),
        }
    }
}

/// Entry counts for inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Live documents.
    pub live: usize,
    /// Soft-deleted documents in the trash area.
    pub trashed: usize,
}

/// The server-side entry store.
#[derive(Debug)]
pub struct EntryStore {
    entries_dir: PathBuf,
    trash_dir: PathBuf,
    locks: Box<[Mutex<()>]>,
}

impl EntryStore {
    /// Opens the store rooted at `data_dir`, creating its directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(data_dir: &Path) -> ServerResult<Self> {
        let entries_dir = data_dir.join(ENTRIES_DIR);
        let trash_dir = entries_dir.join(TRASH_DIR);
        fs::create_dir_all(&trash_dir)?;

        Ok(Self {
            entries_dir,
            trash_dir,
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    /// Directory holding live documents.
    pub fn entries_dir(&self) -> &Path {
        &self.entries_dir
    }

    /// Directory holding soft-deleted documents.
    pub fn trash_dir(&self) -> &Path {
        &self.trash_dir
    }

    /// Lists the manifest of every live entry, ordered by id.
    pub fn list(&self) -> ServerResult<Vec<ManifestEntry>> {
        Ok(self.list_full()?.iter().map(Entry::manifest).collect())
    }

    /// Lists every live entry, ordered by id.
    ///
    /// Malformed documents are skipped.
    pub fn list_full(&self) -> ServerResult<Vec<Entry>> {
        let mut entries = Vec::new();
        for id in document_ids(&self.entries_dir)? {
            match read_document(&self.entry_path(id), id) {
                Ok(Some(entry)) => entries.push(entry),
                // Deleted between read_dir and read.
                Ok(None) => {}
                Err(e) => warn!(%id, error = %e, "skipping malformed entry document"),
            }
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    /// Lists previews of every live entry, newest creation first.
    pub fn previews(&self) -> ServerResult<Vec<EntryPreview>> {
        let mut previews: Vec<EntryPreview> =
            self.list_full()?.iter().map(Entry::preview).collect();
        previews.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
        Ok(previews)
    }

    /// Global hash over the stored hashes of every live entry.
    pub fn global_hash(&self) -> ServerResult<String> {
        Ok(global_hash(&self.list()?))
    }

    /// Fetches one live entry.
    ///
    /// A malformed document reads as absent, matching what listing reports.
    pub fn get(&self, id: Uuid) -> ServerResult<Option<Entry>> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();
        self.read_live(id)
    }

    /// Upserts an entry exactly as supplied.
    pub fn put(&self, entry: Entry) -> ServerResult<Entry> {
        let lock = self.lock_for(entry.id);
        let _guard = lock.lock();
        self.write_live(&entry)?;
        Ok(entry)
    }

    /// Moves a live entry into the trash area. Returns false if absent.
    pub fn soft_delete(&self, id: Uuid) -> ServerResult<bool> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();
        match fs::rename(self.entry_path(id), self.trash_path(id)) {
            Ok(()) => {
                debug!(%id, "entry moved to trash");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Moves a soft-deleted entry back. Returns false if it is not in trash.
    ///
    /// # Errors
    ///
    /// Refuses to overwrite a live entry with the same id.
    pub fn restore(&self, id: Uuid) -> ServerResult<bool> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();
        if !self.trash_path(id).exists() {
            return Ok(false);
        }
        if self.entry_path(id).exists() {
            return Err(ServerError::InvalidRequest(format!(
                "entry {id} already exists"
            )));
        }
        match fs::rename(self.trash_path(id), self.entry_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Creates a server-authored entry.
    pub fn create(
        &self,
        content: String,
        tags: Option<Vec<String>>,
        now: DateTime<Utc>,
    ) -> ServerResult<Entry> {
        self.put(Entry::new(content, tags, now))
    }

    /// Rewrites the content and tags of a live entry, keeping its creation
    /// date. Returns `None` if the entry does not exist.
    pub fn update(
        &self,
        id: Uuid,
        content: String,
        tags: Option<Vec<String>>,
        now: DateTime<Utc>,
    ) -> ServerResult<Option<Entry>> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();

        let Some(mut entry) = self.read_live(id)? else {
            return Ok(None);
        };
        entry.content = content;
        entry.tags = tags;
        entry.last_updated = now.max(entry.last_updated);
        entry.hash = Some(entry.compute_hash());
        self.write_live(&entry)?;
        Ok(Some(entry))
    }

    /// Counts live and trashed documents.
    pub fn stats(&self) -> ServerResult<StoreStats> {
        Ok(StoreStats {
            live: document_ids(&self.entries_dir)?.len(),
            trashed: document_ids(&self.trash_dir)?.len(),
        })
    }

    fn read_live(&self, id: Uuid) -> ServerResult<Option<Entry>> {
        match read_document(&self.entry_path(id), id) {
            Ok(entry) => Ok(entry),
            Err(ServerError::Serialization(e)) => {
                warn!(%id, error = %e, "malformed entry document");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn write_live(&self, entry: &Entry) -> ServerResult<()> {
        let bytes = serde_json::to_vec_pretty(&StoredDocument::from(entry))?;
        let temp_path = self
            .entries_dir
            .join(format!(".{}.{DOCUMENT_EXT}.tmp", entry.id));
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, self.entry_path(entry.id))?;
        Ok(())
    }

    fn lock_for(&self, id: Uuid) -> &Mutex<()> {
        &self.locks[stripe(id)]
    }

    fn entry_path(&self, id: Uuid) -> PathBuf {
        self.entries_dir.join(format!("{id}.{DOCUMENT_EXT}"))
    }

    fn trash_path(&self, id: Uuid) -> PathBuf {
        self.trash_dir.join(format!("{id}.{DOCUMENT_EXT}"))
    }
}

fn stripe(id: Uuid) -> usize {
    (id.as_u128() % LOCK_STRIPES as u128) as usize
}

/// Ids of every `<uuid>.json` file directly inside `dir`.
fn document_ids(dir: &Path) -> ServerResult<Vec<Uuid>> {
    let mut ids = Vec::new();
    for item in fs::read_dir(dir)? {
        let item = item?;
        let path = item.path();
        if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXT) {
            continue;
        }
        if !item.file_type()?.is_file() {
            continue;
        }
        let Some(id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            continue;
        };
        ids.push(id);
    }
    Ok(ids)
}

fn read_document(path: &Path, id: Uuid) -> ServerResult<Option<Entry>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let doc: StoredDocument = serde_json::from_slice(&bytes)?;

    let (creation_date, last_updated) = match (doc.creation_date, doc.last_updated) {
        (Some(created), Some(updated)) => (created, updated),
        (Some(created), None) => (created, created),
        (None, Some(updated)) => (updated, updated),
        (None, None) => {
            let modified: DateTime<Utc> = fs::metadata(path)?.modified()?.into();
            (modified, modified)
        }
    };

    Ok(Some(Entry {
        id,
        content: doc.content,
        creation_date,
        last_updated,
        hash: doc.hash,
        tags: doc.tags,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use journal_sync_protocol::entry_hash;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_704_067_200 + secs, 0).unwrap()
    }

    fn open() -> (TempDir, EntryStore) {
        let dir = TempDir::new().unwrap();
        let store = EntryStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn entry(content: &str, hash: &str, secs: i64) -> Entry {
        let mut entry = Entry::new(content, None, at(secs));
        entry.hash = Some(hash.to_string());
        entry
    }

    #[test]
    fn open_creates_directories() {
        let (dir, store) = open();
        assert!(dir.path().join("entries").is_dir());
        assert!(store.trash_dir().is_dir());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn put_then_get_preserves_caller_fields() {
        let (_dir, store) = open();
        let mut e = entry("body", "abc123def456", 5);
        e.tags = Some(vec!["tag1".into(), "tag2".into()]);
        store.put(e.clone()).unwrap();

        let fetched = store.get(e.id).unwrap().unwrap();
        assert_eq!(fetched, e);
    }

    #[test]
    fn put_overwrites() {
        let (_dir, store) = open();
        let mut e = entry("v1", "old-hash", 1);
        store.put(e.clone()).unwrap();
        e.content = "v2".into();
        e.hash = Some("new-hash".into());
        e.last_updated = at(0);
        store.put(e.clone()).unwrap();

        let fetched = store.get(e.id).unwrap().unwrap();
        assert_eq!(fetched.content, "v2");
        assert_eq!(fetched.last_updated, at(0));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn get_missing_is_none() {
        let (_dir, store) = open();
        assert!(store.get(Uuid::nil()).unwrap().is_none());
    }

    #[test]
    fn manifest_projects_entries() {
        let (_dir, store) = open();
        let e = entry("body", "manifest-hash-123", 2);
        store.put(e.clone()).unwrap();

        let manifest = store.list().unwrap();
        assert_eq!(manifest, vec![e.manifest()]);
    }

    #[test]
    fn soft_delete_moves_to_trash() {
        let (_dir, store) = open();
        let e = entry("doomed", "h", 0);
        store.put(e.clone()).unwrap();

        assert!(store.soft_delete(e.id).unwrap());
        assert!(store.get(e.id).unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
        assert!(store.trash_dir().join(format!("{}.json", e.id)).exists());
        assert!(!store.soft_delete(e.id).unwrap());
        assert_eq!(store.stats().unwrap(), StoreStats { live: 0, trashed: 1 });
    }

    #[test]
    fn restore_from_trash() {
        let (_dir, store) = open();
        let e = entry("keep", "h", 0);
        store.put(e.clone()).unwrap();
        store.soft_delete(e.id).unwrap();

        assert!(store.restore(e.id).unwrap());
        assert_eq!(store.get(e.id).unwrap().unwrap().content, "keep");
        assert!(!store.restore(e.id).unwrap());
    }

    #[test]
    fn restore_of_live_entry_is_a_no_op() {
        let (_dir, store) = open();
        let e = entry("live", "h", 0);
        store.put(e.clone()).unwrap();

        assert!(!store.restore(e.id).unwrap());
        assert_eq!(store.get(e.id).unwrap().unwrap().content, "live");
        assert!(!store.restore(Uuid::new_v4()).unwrap());
    }

    #[test]
    fn lock_table_does_not_grow_with_ids() {
        let (_dir, store) = open();
        for i in 0..200 {
            let e = entry("churn", "h", i);
            store.put(e.clone()).unwrap();
            store.soft_delete(e.id).unwrap();
            assert!(stripe(e.id) < LOCK_STRIPES);
        }
        assert_eq!(store.locks.len(), LOCK_STRIPES);
        assert_eq!(store.stats().unwrap(), StoreStats { live: 0, trashed: 200 });
    }

    #[test]
    fn restore_refuses_to_clobber() {
        let (_dir, store) = open();
        let e = entry("v1", "h", 0);
        store.put(e.clone()).unwrap();
        store.soft_delete(e.id).unwrap();
        store.put(e.clone()).unwrap();

        assert!(matches!(
            store.restore(e.id),
            Err(ServerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn malformed_documents_are_skipped() {
        let (_dir, store) = open();
        let good = entry("good", "h", 0);
        store.put(good.clone()).unwrap();

        let bad = Uuid::new_v4();
        fs::write(store.entries_dir().join(format!("{bad}.json")), b"{ not json").unwrap();
        fs::write(store.entries_dir().join("notes.txt"), b"ignored").unwrap();
        fs::write(store.entries_dir().join("not-a-uuid.json"), b"{}").unwrap();

        let listed = store.list_full().unwrap();
        assert_eq!(listed, vec![good]);
        assert!(store.get(bad).unwrap().is_none());
    }

    #[test]
    fn missing_dates_fall_back() {
        let (_dir, store) = open();
        let id = Uuid::new_v4();
        fs::write(
            store.entries_dir().join(format!("{id}.json")),
            br#"{"lastUpdated":"2024-01-01T00:00:00Z","content":"Content without creation date"}"#,
        )
        .unwrap();

        let fetched = store.get(id).unwrap().unwrap();
        assert_eq!(fetched.creation_date, at(0));
        assert_eq!(fetched.last_updated, at(0));
        assert!(fetched.hash.is_none());

        let bare = Uuid::new_v4();
        fs::write(
            store.entries_dir().join(format!("{bare}.json")),
            br#"{"content":"no dates"}"#,
        )
        .unwrap();
        let fetched = store.get(bare).unwrap().unwrap();
        assert_eq!(fetched.creation_date, fetched.last_updated);
    }

    #[test]
    fn global_hash_tracks_changes() {
        let (_dir, store) = open();
        let mut e = entry("x", "original-hash", 0);
        store.put(e.clone()).unwrap();
        let first = store.global_hash().unwrap();
        assert_eq!(first, store.global_hash().unwrap());
        assert_eq!(first.len(), 64);

        e.hash = Some("updated-hash".into());
        store.put(e).unwrap();
        assert_ne!(first, store.global_hash().unwrap());
    }

    #[test]
    fn create_and_update_are_server_authored() {
        let (_dir, store) = open();
        let created = store
            .create("first".into(), Some(vec!["work".into()]), at(0))
            .unwrap();
        assert_eq!(
            created.hash.as_deref(),
            Some(entry_hash("first", Some(&["work".to_string()])).as_str())
        );

        let updated = store
            .update(created.id, "second".into(), None, at(10))
            .unwrap()
            .unwrap();
        assert_eq!(updated.creation_date, at(0));
        assert_eq!(updated.last_updated, at(10));
        assert_eq!(updated.hash.as_deref(), Some(entry_hash("second", None).as_str()));

        assert!(store
            .update(Uuid::new_v4(), "x".into(), None, at(0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn previews_newest_first() {
        let (_dir, store) = open();
        store.create("older".into(), None, at(0)).unwrap();
        store.create("newer".into(), None, at(60)).unwrap();

        let previews = store.previews().unwrap();
        assert_eq!(previews[0].preview, "newer");
        assert_eq!(previews[1].preview, "older");
    }

    #[test]
    fn reopen_sees_existing_documents() {
        let dir = TempDir::new().unwrap();
        let e = entry("persisted", "h", 0);
        EntryStore::open(dir.path()).unwrap().put(e.clone()).unwrap();

        let reopened = EntryStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(e.id).unwrap(), Some(e));
    }
}
