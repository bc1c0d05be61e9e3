//! Sync coordinator.
//!
//! Owns the invocation policy around a [`ReconciliationEngine`]:
//!
//! - single-flight: a trigger while a run is active joins that run
//! - online/offline tracking: going online triggers a run, being offline
//!   suppresses new ones
//! - periodic triggering
//! - subscriber notification of the syncing flag
//! - local mutations, each of which triggers a run when online
//!
//! Background triggers need a tokio runtime; outside one they are skipped.

use crate::config::SyncConfig;
use crate::engine::{RefreshReport, ReconciliationEngine, SyncReport, SyncStats};
use crate::error::{SyncError, SyncResult};
use crate::local_store::{LocalEntry, LocalStore, SyncStatus};
use crate::transport::SyncTransport;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use journal_sync_protocol::{entry_hash, Entry};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Result of a shared sync run. The error is shared between every caller
/// that joined the run.
pub type SharedSyncResult = Result<SyncReport, Arc<SyncError>>;

type SyncRun = Shared<BoxFuture<'static, SharedSyncResult>>;
type RefreshRun = Shared<BoxFuture<'static, ()>>;
type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// Handle returned by [`SyncCoordinator::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
enum InFlight {
    Sync(SyncRun),
    Refresh(RefreshRun),
}

enum Claim {
    Join(SyncRun),
    Wait(RefreshRun),
    Started(SyncRun),
}

struct Inner<T: SyncTransport, S: LocalStore> {
    engine: ReconciliationEngine<T, S>,
    config: SyncConfig,
    online: AtomicBool,
    syncing: AtomicBool,
    in_flight: Mutex<Option<InFlight>>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_listener: AtomicU64,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

impl<T: SyncTransport, S: LocalStore> Inner<T, S> {
    fn set_syncing(&self, syncing: bool) {
        self.syncing.store(syncing, Ordering::SeqCst);
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(syncing);
        }
    }
}

impl<T: SyncTransport, S: LocalStore> Drop for Inner<T, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.periodic.get_mut().take() {
            handle.abort();
        }
    }
}

/// Frees the in-flight slot and reports `syncing = false` when a run ends,
/// however it ends.
struct RunGuard<T: SyncTransport, S: LocalStore> {
    inner: Arc<Inner<T, S>>,
    _done: Option<oneshot::Sender<()>>,
}

impl<T: SyncTransport, S: LocalStore> Drop for RunGuard<T, S> {
    fn drop(&mut self) {
        self.inner.in_flight.lock().take();
        self.inner.set_syncing(false);
    }
}

/// Drives a replica's reconciliation engine.
///
/// Cheap to clone; clones share all state.
///
/// # Example
///
/// ```rust,ignore
/// let coordinator = SyncCoordinator::new(engine, config);
/// coordinator.subscribe(|syncing| println!("syncing: {syncing}"));
/// coordinator.start_periodic();
/// let entry = coordinator.create_entry("Dear diary", None)?;
/// coordinator.wait_for_sync().await;
/// ```
pub struct SyncCoordinator<T: SyncTransport + 'static, S: LocalStore + 'static> {
    inner: Arc<Inner<T, S>>,
}

impl<T: SyncTransport + 'static, S: LocalStore + 'static> Clone for SyncCoordinator<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SyncTransport + 'static, S: LocalStore + 'static> SyncCoordinator<T, S> {
    /// Creates a coordinator. The replica starts online and idle.
    pub fn new(engine: ReconciliationEngine<T, S>, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                config,
                online: AtomicBool::new(true),
                syncing: AtomicBool::new(false),
                in_flight: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                periodic: Mutex::new(None),
            }),
        }
    }

    /// The engine.
    pub fn engine(&self) -> &ReconciliationEngine<T, S> {
        &self.inner.engine
    }

    /// The local store.
    pub fn store(&self) -> &Arc<S> {
        self.inner.engine.store()
    }

    /// Engine statistics.
    pub fn stats(&self) -> SyncStats {
        self.inner.engine.stats()
    }

    /// Returns true while a run is in flight.
    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::SeqCst)
    }

    /// Returns the last reported connectivity.
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Reports connectivity. Going online triggers a run; going offline
    /// leaves an in-flight run alone.
    pub fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            info!("replica online");
            self.trigger();
        } else if !online && was_online {
            info!("replica offline");
        }
    }

    /// Registers a callback invoked with the syncing flag on every change.
    pub fn subscribe(&self, listener: impl Fn(bool) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Removes a callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Runs a sync, or joins the one already in flight.
    ///
    /// Fails with [`SyncError::Offline`] if a new run would be needed while
    /// offline.
    pub async fn sync(&self) -> SharedSyncResult {
        loop {
            match self.claim_sync()? {
                Claim::Join(run) | Claim::Started(run) => return run.await,
                Claim::Wait(refresh) => refresh.await,
            }
        }
    }

    /// Starts or joins a run in the background if online.
    pub fn trigger(&self) {
        if !self.is_online() {
            debug!("offline, sync trigger suppressed");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime, sync trigger skipped");
            return;
        };
        let this = self.clone();
        runtime.spawn(async move {
            let _ = this.sync().await;
        });
    }

    /// Waits for the in-flight run, if any. Returns its result for a sync
    /// run and `None` when nothing was syncing or a force refresh was.
    pub async fn wait_for_sync(&self) -> Option<SharedSyncResult> {
        let in_flight = self.inner.in_flight.lock().clone();
        match in_flight {
            Some(InFlight::Sync(run)) => Some(run.await),
            Some(InFlight::Refresh(refresh)) => {
                refresh.await;
                None
            }
            None => None,
        }
    }

    /// Makes the local replica an exact copy of the server.
    ///
    /// Waits for any in-flight run first, then holds the single-flight slot
    /// for its own duration. Fails fast when offline. Once the slot is taken
    /// the refresh runs on its own task and completes even if this future
    /// is dropped.
    pub async fn force_refresh<F>(&self, on_progress: F) -> SyncResult<RefreshReport>
    where
        F: FnMut(usize, usize) + Send + 'static,
    {
        let handle = loop {
            if !self.is_online() {
                return Err(SyncError::Offline {
                    operation: "force refresh",
                });
            }
            let busy = {
                let mut slot = self.inner.in_flight.lock();
                if let Some(in_flight) = slot.clone() {
                    in_flight
                } else {
                    let (done, finished) = oneshot::channel::<()>();
                    *slot = Some(InFlight::Refresh(finished.map(|_| ()).boxed().shared()));
                    let guard = RunGuard {
                        inner: Arc::clone(&self.inner),
                        _done: Some(done),
                    };
                    break self.spawn_refresh(guard, on_progress);
                }
            };
            match busy {
                InFlight::Sync(run) => {
                    let _ = run.await;
                }
                InFlight::Refresh(refresh) => refresh.await,
            }
        };

        handle
            .await
            .unwrap_or_else(|e| Err(SyncError::Internal(e.to_string())))
    }

    /// Starts the periodic timer. Returns false if it is already running or
    /// there is no runtime.
    pub fn start_periodic(&self) -> bool {
        let mut periodic = self.inner.periodic.lock();
        if periodic.is_some() {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let period = self.inner.config.sync_interval.max(Duration::from_millis(1));
        *periodic = Some(runtime.spawn(periodic_loop(Arc::downgrade(&self.inner), period)));
        debug!(?period, "periodic sync started");
        true
    }

    /// Stops the periodic timer. Returns false if it was not running.
    pub fn stop_periodic(&self) -> bool {
        match self.inner.periodic.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Creates a pending entry and triggers a sync.
    pub fn create_entry(
        &self,
        content: impl Into<String>,
        tags: Option<Vec<String>>,
    ) -> SyncResult<LocalEntry> {
        let local = LocalEntry::pending(Entry::new(content, tags, Utc::now()));
        self.store().put(local.clone())?;
        debug!(id = %local.id(), "entry created");
        self.trigger();
        Ok(local)
    }

    /// Edits a live entry and triggers a sync. Returns `None` if the entry
    /// is absent or trashed.
    pub fn update_entry(
        &self,
        id: Uuid,
        content: impl Into<String>,
        tags: Option<Vec<String>>,
    ) -> SyncResult<Option<LocalEntry>> {
        let Some(mut local) = self.store().get(id)? else {
            return Ok(None);
        };
        if local.trashed {
            return Ok(None);
        }

        let content = content.into();
        local.entry.hash = Some(entry_hash(&content, tags.as_deref()));
        local.entry.content = content;
        local.entry.tags = tags;
        local.entry.last_updated = Utc::now().max(local.entry.last_updated);
        local.sync_status = SyncStatus::Pending;
        self.store().put(local.clone())?;
        debug!(%id, "entry updated");
        self.trigger();
        Ok(Some(local))
    }

    /// Trashes an entry and triggers a sync. Returns false if absent.
    pub fn delete_entry(&self, id: Uuid) -> SyncResult<bool> {
        let found = self.store().mark_trashed(id, Utc::now())?;
        if found {
            debug!(%id, "entry trashed");
            self.trigger();
        }
        Ok(found)
    }

    fn claim_sync(&self) -> Result<Claim, Arc<SyncError>> {
        let mut slot = self.inner.in_flight.lock();
        match slot.clone() {
            Some(InFlight::Sync(run)) => return Ok(Claim::Join(run)),
            Some(InFlight::Refresh(refresh)) => return Ok(Claim::Wait(refresh)),
            None => {}
        }
        if !self.is_online() {
            return Err(Arc::new(SyncError::Offline { operation: "sync" }));
        }
        let run = self.spawn_run();
        *slot = Some(InFlight::Sync(run.clone()));
        Ok(Claim::Started(run))
    }

    fn spawn_run(&self) -> SyncRun {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let _guard = RunGuard {
                inner: Arc::clone(&inner),
                _done: None,
            };
            inner.set_syncing(true);
            inner.engine.sync().await.map_err(Arc::new)
        });
        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(Arc::new(SyncError::Internal(e.to_string()))))
        }
        .boxed()
        .shared()
    }

    fn spawn_refresh<F>(
        &self,
        guard: RunGuard<T, S>,
        on_progress: F,
    ) -> JoinHandle<SyncResult<RefreshReport>>
    where
        F: FnMut(usize, usize) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _guard = guard;
            inner.set_syncing(true);
            inner.engine.force_refresh(on_progress).await
        })
    }
}

async fn periodic_loop<T, S>(inner: Weak<Inner<T, S>>, period: Duration)
where
    T: SyncTransport + 'static,
    S: LocalStore + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        SyncCoordinator { inner }.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::MemoryLocalStore;
    use crate::transport::{MockTransport, TransportCalls};
    use async_trait::async_trait;
    use journal_sync_protocol::{BatchRequest, BatchResponse, ManifestEntry};

    /// Delays every call so concurrent triggers overlap.
    struct SlowTransport {
        inner: MockTransport,
        delay: Duration,
    }

    #[async_trait]
    impl SyncTransport for SlowTransport {
        async fn get_global_hash(&self) -> SyncResult<String> {
            tokio::time::sleep(self.delay).await;
            self.inner.get_global_hash().await
        }

        async fn get_manifest(&self) -> SyncResult<Vec<ManifestEntry>> {
            tokio::time::sleep(self.delay).await;
            self.inner.get_manifest().await
        }

        async fn get_entry_body(&self, id: Uuid) -> SyncResult<Option<Entry>> {
            tokio::time::sleep(self.delay).await;
            self.inner.get_entry_body(id).await
        }

        async fn apply_batch(&self, batch: &BatchRequest) -> SyncResult<BatchResponse> {
            tokio::time::sleep(self.delay).await;
            self.inner.apply_batch(batch).await
        }
    }

    type TestCoordinator = SyncCoordinator<SlowTransport, MemoryLocalStore>;

    fn create_coordinator(delay_ms: u64) -> (Arc<SlowTransport>, TestCoordinator) {
        let transport = Arc::new(SlowTransport {
            inner: MockTransport::new(),
            delay: Duration::from_millis(delay_ms),
        });
        let store = Arc::new(MemoryLocalStore::new());
        let engine = ReconciliationEngine::new(Arc::clone(&transport), store);
        let config = SyncConfig::default().with_sync_interval(Duration::from_millis(20));
        (transport, SyncCoordinator::new(engine, config))
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn concurrent_syncs_share_one_run() {
        let (transport, coordinator) = create_coordinator(30);

        let (a, b) = tokio::join!(coordinator.sync(), coordinator.sync());
        assert!(a.unwrap().fast_path);
        assert!(b.unwrap().fast_path);
        assert_eq!(transport.inner.calls().status, 1);
        assert_eq!(coordinator.stats().syncs_completed, 1);
        assert!(!coordinator.is_syncing());
    }

    #[tokio::test]
    async fn listeners_see_each_transition() {
        let (_transport, coordinator) = create_coordinator(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = coordinator.subscribe(move |syncing| sink.lock().push(syncing));

        coordinator.sync().await.unwrap();
        assert_eq!(*seen.lock(), vec![true, false]);

        assert!(coordinator.unsubscribe(id));
        assert!(!coordinator.unsubscribe(id));
        coordinator.sync().await.unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn offline_rejects_new_runs() {
        let (_transport, coordinator) = create_coordinator(0);
        coordinator.set_online(false);

        let err = coordinator.sync().await.unwrap_err();
        assert!(matches!(*err, SyncError::Offline { .. }));

        let err = coordinator.force_refresh(|_, _| {}).await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot force refresh while offline");
        assert_eq!(coordinator.stats().failures, 0);
    }

    #[tokio::test]
    async fn going_online_uploads_offline_work() {
        let (transport, coordinator) = create_coordinator(0);
        coordinator.set_online(false);
        let created = coordinator.create_entry("A", None).unwrap();
        assert_eq!(created.sync_status, SyncStatus::Pending);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(transport.inner.entry(created.id()).is_none());

        coordinator.set_online(true);
        eventually(|| transport.inner.entry(created.id()).is_some()).await;
        let store = Arc::clone(coordinator.store());
        eventually(move || {
            store
                .get(created.id())
                .unwrap()
                .is_some_and(|e| e.sync_status == SyncStatus::Synced)
        })
        .await;
    }

    #[tokio::test]
    async fn mutations_trigger_sync() {
        let (transport, coordinator) = create_coordinator(0);
        let created = coordinator.create_entry("first", None).unwrap();
        eventually(|| transport.inner.entry(created.id()).is_some()).await;
        coordinator.wait_for_sync().await;

        let updated = coordinator
            .update_entry(created.id(), "second", Some(vec!["t".into()]))
            .unwrap()
            .unwrap();
        assert!(updated.entry.last_updated >= created.entry.last_updated);
        assert_eq!(
            updated.entry.hash.as_deref(),
            Some(entry_hash("second", Some(&["t".to_string()][..])).as_str())
        );
        eventually(|| {
            transport
                .inner
                .entry(created.id())
                .is_some_and(|e| e.content == "second")
        })
        .await;
        coordinator.wait_for_sync().await;

        assert!(coordinator.delete_entry(created.id()).unwrap());
        assert!(coordinator
            .update_entry(created.id(), "too late", None)
            .unwrap()
            .is_none());
        eventually(|| transport.inner.entry(created.id()).is_none()).await;
        let store = Arc::clone(coordinator.store());
        eventually(move || store.get(created.id()).unwrap().is_none()).await;

        assert!(!coordinator.delete_entry(Uuid::new_v4()).unwrap());
        assert!(coordinator
            .update_entry(Uuid::new_v4(), "x", None)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn force_refresh_waits_for_running_sync() {
        let (transport, coordinator) = create_coordinator(20);
        let server = Entry::new("server", None, Utc::now());
        transport.inner.insert(server.clone());

        let background = coordinator.clone();
        let running = tokio::spawn(async move { background.sync().await });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&progress);
        let report = coordinator
            .force_refresh(move |current, total| sink.lock().push((current, total)))
            .await
            .unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(*progress.lock(), vec![(1, 1)]);
        assert!(running.await.unwrap().is_ok());
        assert!(!coordinator.is_syncing());
        assert!(coordinator.wait_for_sync().await.is_none());
        assert_eq!(coordinator.store().get_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dropped_force_refresh_still_completes() {
        let (transport, coordinator) = create_coordinator(40);
        for n in 0..5 {
            transport
                .inner
                .insert(Entry::new(format!("server {n}"), None, Utc::now()));
        }

        let abandoned = tokio::time::timeout(
            Duration::from_millis(130),
            coordinator.force_refresh(|_, _| {}),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(coordinator.is_syncing());

        assert!(coordinator.wait_for_sync().await.is_none());
        assert!(!coordinator.is_syncing());
        assert_eq!(coordinator.store().get_all().unwrap().len(), 5);
        let checkpoint = coordinator.store().checkpoint().unwrap();
        assert!(checkpoint.last_sync_time.is_some());
        assert_eq!(
            checkpoint.global_hash,
            Some(transport.inner.get_global_hash().await.unwrap())
        );
        assert_eq!(coordinator.stats().refreshes_completed, 1);
    }

    #[tokio::test]
    async fn going_offline_lets_running_sync_finish() {
        let (transport, coordinator) = create_coordinator(30);
        let pending = LocalEntry::pending(Entry::new("written offline", None, Utc::now()));
        coordinator.store().put(pending.clone()).unwrap();

        let background = coordinator.clone();
        let running = tokio::spawn(async move { background.sync().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coordinator.is_syncing());
        coordinator.set_online(false);

        let report = running.await.unwrap().unwrap();
        assert_eq!(report.uploaded, 1);
        assert!(transport.inner.entry(pending.id()).is_some());
        assert_eq!(
            coordinator.store().get(pending.id()).unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );

        transport.inner.reset_calls();
        coordinator.trigger();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(transport.inner.calls(), TransportCalls::default());
        assert!(!coordinator.is_syncing());
    }

    #[tokio::test]
    async fn periodic_timer_pulls_server_changes() {
        let (transport, coordinator) = create_coordinator(0);
        assert!(coordinator.start_periodic());
        assert!(!coordinator.start_periodic());

        let server = Entry::new("from elsewhere", None, Utc::now());
        transport.inner.insert(server.clone());
        let store = Arc::clone(coordinator.store());
        eventually(move || store.get(server.id).unwrap().is_some()).await;

        assert!(coordinator.stop_periodic());
        assert!(!coordinator.stop_periodic());
    }
}
