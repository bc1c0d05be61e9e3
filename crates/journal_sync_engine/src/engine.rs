//! Reconciliation engine.
//!
//! Compares the local replica with the server and produces the minimal set
//! of uploads, downloads and purges. Conflicts are resolved per entry by
//! last-write-wins on `lastUpdated`; equal timestamps leave both sides
//! untouched.
//!
//! Nothing is rolled back on failure. Each completed step is durable, so a
//! run that aborts halfway is simply picked up by the next one.

use crate::error::SyncResult;
use crate::local_store::{LocalEntry, LocalStore, SyncCheckpoint, SyncStatus};
use crate::transport::SyncTransport;
use chrono::Utc;
use journal_sync_protocol::{global_hash, BatchRequest, Entry, ManifestEntry};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Statistics about engine runs.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed `sync` runs.
    pub syncs_completed: u64,
    /// Runs that ended on the fast path.
    pub fast_paths: u64,
    /// Completed force refreshes.
    pub refreshes_completed: u64,
    /// Runs (of either kind) that failed.
    pub failures: u64,
    /// Entries uploaded.
    pub entries_uploaded: u64,
    /// Deletions uploaded.
    pub entries_deleted: u64,
    /// Entries downloaded.
    pub entries_downloaded: u64,
    /// Entries purged locally.
    pub entries_purged: u64,
    /// When the last successful run finished.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of one `sync` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// True if global hashes matched and nothing was pending.
    pub fast_path: bool,
    /// Entries uploaded in the batch.
    pub uploaded: usize,
    /// Deletions uploaded in the batch.
    pub deleted: usize,
    /// Entries downloaded and stored.
    pub downloaded: usize,
    /// Entries purged locally.
    pub purged: usize,
    /// Server global hash recorded in the checkpoint.
    pub server_global_hash: Option<String>,
}

impl SyncReport {
    /// Returns true if the run changed nothing on either side.
    pub fn is_noop(&self) -> bool {
        self.uploaded == 0 && self.deleted == 0 && self.downloaded == 0 && self.purged == 0
    }
}

/// Outcome of one `force_refresh` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Entries overwritten from the server.
    pub downloaded: usize,
    /// Local entries purged.
    pub purged: usize,
    /// Manifest size at the start of the run.
    pub total: usize,
}

/// What a `sync` run is going to do.
#[derive(Debug, Default)]
struct Plan {
    download: Vec<Uuid>,
    upload: Vec<Entry>,
    delete: Vec<Uuid>,
    purge: Vec<Uuid>,
}

impl Plan {
    fn classify(manifest: &[ManifestEntry], local: &[LocalEntry]) -> Self {
        let server: HashSet<Uuid> = manifest.iter().map(|m| m.id).collect();
        let by_id: HashMap<Uuid, &LocalEntry> = local.iter().map(|e| (e.id(), e)).collect();
        let mut plan = Plan::default();
        let mut uploading = HashSet::new();

        for remote in manifest {
            match by_id.get(&remote.id) {
                None => plan.download.push(remote.id),
                Some(mine) if mine.is_clean() && remote.hash != mine.entry.hash => {
                    match remote.last_updated.cmp(&mine.entry.last_updated) {
                        Ordering::Greater => plan.download.push(remote.id),
                        Ordering::Less => {
                            uploading.insert(remote.id);
                            plan.upload.push(mine.entry.clone());
                        }
                        Ordering::Equal => {
                            debug!(id = %remote.id, "timestamps tie, leaving entry alone");
                        }
                    }
                }
                Some(_) => {}
            }
        }

        for mine in local {
            let id = mine.id();
            if mine.trashed {
                if server.contains(&id) || mine.sync_status == SyncStatus::Pending {
                    plan.delete.push(id);
                } else if mine.sync_status == SyncStatus::Synced {
                    plan.purge.push(id);
                }
            } else if mine.sync_status == SyncStatus::Pending {
                if uploading.insert(id) {
                    plan.upload.push(mine.entry.clone());
                }
            } else if mine.sync_status == SyncStatus::Synced && !server.contains(&id) {
                plan.purge.push(id);
            }
        }

        plan
    }
}

/// The reconciliation engine for one replica.
///
/// Runs are not serialized here; [`crate::SyncCoordinator`] guarantees
/// that at most one is in flight.
pub struct ReconciliationEngine<T: SyncTransport, S: LocalStore> {
    transport: Arc<T>,
    store: Arc<S>,
    stats: RwLock<SyncStats>,
}

impl<T: SyncTransport, S: LocalStore> ReconciliationEngine<T, S> {
    /// Creates a new engine.
    pub fn new(transport: Arc<T>, store: Arc<S>) -> Self {
        Self {
            transport,
            store,
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// The transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The local store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Reconciles the local replica with the server, preserving unsynced
    /// local work.
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        let result = self.reconcile().await;
        let mut stats = self.stats.write();
        match &result {
            Ok(report) => {
                stats.syncs_completed += 1;
                if report.fast_path {
                    stats.fast_paths += 1;
                }
                stats.entries_uploaded += report.uploaded as u64;
                stats.entries_deleted += report.deleted as u64;
                stats.entries_downloaded += report.downloaded as u64;
                stats.entries_purged += report.purged as u64;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
            }
            Err(e) => {
                warn!(error = %e, "sync failed");
                stats.failures += 1;
                stats.last_error = Some(e.to_string());
            }
        }
        result
    }

    /// Makes the local replica an exact copy of the server, discarding
    /// local work that was not uploaded.
    ///
    /// `on_progress(current, total)` is called once per manifest entry,
    /// with `current` counting from 1.
    pub async fn force_refresh<F>(&self, on_progress: F) -> SyncResult<RefreshReport>
    where
        F: FnMut(usize, usize) + Send,
    {
        let result = self.refresh(on_progress).await;
        let mut stats = self.stats.write();
        match &result {
            Ok(report) => {
                stats.refreshes_completed += 1;
                stats.entries_downloaded += report.downloaded as u64;
                stats.entries_purged += report.purged as u64;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
            }
            Err(e) => {
                warn!(error = %e, "force refresh failed");
                stats.failures += 1;
                stats.last_error = Some(e.to_string());
            }
        }
        result
    }

    async fn reconcile(&self) -> SyncResult<SyncReport> {
        let server_hash = self.transport.get_global_hash().await?;
        let local = self.store.get_all_including_trashed()?;
        let local_hash = global_hash(local.iter().filter(|e| e.is_clean()));

        if server_hash == local_hash && !local.iter().any(LocalEntry::is_dirty) {
            debug!(hash = %server_hash, "replica up to date");
            self.store.set_checkpoint(SyncCheckpoint {
                last_sync_time: Some(Utc::now()),
                global_hash: Some(server_hash.clone()),
            })?;
            return Ok(SyncReport {
                fast_path: true,
                server_global_hash: Some(server_hash),
                ..SyncReport::default()
            });
        }

        let manifest = self.transport.get_manifest().await?;
        let plan = Plan::classify(&manifest, &local);
        debug!(
            server = manifest.len(),
            local = local.len(),
            download = plan.download.len(),
            upload = plan.upload.len(),
            delete = plan.delete.len(),
            purge = plan.purge.len(),
            "classified replica"
        );

        let mut report = SyncReport::default();

        for id in &plan.purge {
            if self.store.hard_delete(*id)? {
                debug!(%id, "purged entry removed from server");
                report.purged += 1;
            }
        }

        if !plan.upload.is_empty() || !plan.delete.is_empty() {
            let batch = BatchRequest::new(plan.upload, plan.delete);
            let response = self.transport.apply_batch(&batch).await?;
            debug!(
                updated = response.updated,
                deleted = response.deleted,
                "batch applied"
            );

            for entry in &batch.updates {
                let marked =
                    self.store
                        .mark_synced(entry.id, entry.last_updated, entry.hash.as_deref())?;
                if !marked {
                    debug!(id = %entry.id, "entry changed during upload, left pending");
                }
            }
            for id in &batch.deletions {
                self.store.hard_delete(*id)?;
            }
            report.uploaded = batch.updates.len();
            report.deleted = batch.deletions.len();
        }

        for id in plan.download {
            match self.transport.get_entry_body(id).await? {
                Some(entry) => {
                    if self.store.put_remote(entry)? {
                        report.downloaded += 1;
                    } else {
                        debug!(%id, "entry edited locally meanwhile, download skipped");
                    }
                }
                None => debug!(%id, "entry vanished from server before download"),
            }
        }

        report.server_global_hash = self.checkpoint().await?;
        info!(
            uploaded = report.uploaded,
            deleted = report.deleted,
            downloaded = report.downloaded,
            purged = report.purged,
            "sync complete"
        );
        Ok(report)
    }

    async fn refresh<F>(&self, mut on_progress: F) -> SyncResult<RefreshReport>
    where
        F: FnMut(usize, usize) + Send,
    {
        let manifest = self.transport.get_manifest().await?;
        let total = manifest.len();
        let mut report = RefreshReport {
            total,
            ..RefreshReport::default()
        };

        for (i, remote) in manifest.iter().enumerate() {
            match self.transport.get_entry_body(remote.id).await? {
                Some(entry) => {
                    self.store.put(LocalEntry::synced(entry))?;
                    report.downloaded += 1;
                }
                None => {
                    if self.store.hard_delete(remote.id)? {
                        report.purged += 1;
                    }
                }
            }
            on_progress(i + 1, total);
        }

        let server: HashSet<Uuid> = manifest.iter().map(|m| m.id).collect();
        for local in self.store.get_all_including_trashed()? {
            if !server.contains(&local.id()) && self.store.hard_delete(local.id())? {
                report.purged += 1;
            }
        }

        self.checkpoint().await?;
        info!(
            downloaded = report.downloaded,
            purged = report.purged,
            total,
            "force refresh complete"
        );
        Ok(report)
    }

    /// Records the sync checkpoint. A failed hash fetch still records the
    /// time, with the hash cleared.
    async fn checkpoint(&self) -> SyncResult<Option<String>> {
        let hash = match self.transport.get_global_hash().await {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!(error = %e, "could not refresh server hash after sync");
                None
            }
        };
        self.store.set_checkpoint(SyncCheckpoint {
            last_sync_time: Some(Utc::now()),
            global_hash: hash.clone(),
        })?;
        Ok(hash)
    }
}
