//! The engine facade wiring store, writer, driver and monitor together.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::config::{Config, SyncConfig};
use crate::error::QueueError;
use crate::queue::{
    now_ms, EntryId, MonotonicClock, QueueEntry, QueueStats, QueueStore, QueueWriter,
    SqliteQueueStore, Status, SupportedKinds,
};
use crate::storage::Database;
use crate::sync::{
    Connectivity, ConnectivityMonitor, ConnectivitySignal, DrainOutcome, MonitorHandle,
    RemoteApply, SyncDriver, SyncEvent,
};

/// An offline-first mutation queue with background replay.
///
/// Writes go to the local store through [`SyncEngine::enqueue`] and return
/// as soon as they are durable. Replay happens on connectivity changes, on
/// a periodic timer once [`SyncEngine::start`] was called, or on demand.
pub struct SyncEngine {
    store: Arc<dyn QueueStore>,
    writer: QueueWriter,
    driver: Arc<SyncDriver>,
    connectivity: watch::Sender<ConnectivitySignal>,
    interval: Duration,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl SyncEngine {
    /// Build an engine over an existing store.
    ///
    /// The enqueue clock is seeded from the newest entry already stored so
    /// new entries always sort after recovered ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn new(
        store: Arc<dyn QueueStore>,
        kinds: SupportedKinds,
        remote: Arc<dyn RemoteApply>,
        config: &SyncConfig,
    ) -> Result<Self, QueueError> {
        let latest = store.latest_enqueued_at().await?.unwrap_or(0);
        let clock = Arc::new(MonotonicClock::starting_after(latest));

        let writer = QueueWriter::new(Arc::clone(&store), Arc::new(kinds), clock);
        let driver = Arc::new(SyncDriver::new(
            Arc::clone(&store),
            remote,
            config.retry_policy(),
            config.driver_config(),
        ));
        let (connectivity, _) = watch::channel(ConnectivitySignal::new(Connectivity::Online));

        Ok(Self {
            store,
            writer,
            driver,
            connectivity,
            interval: config.interval(),
            monitor: Mutex::new(None),
        })
    }

    /// Open the `SQLite` queue at `path` and build an engine over it.
    ///
    /// Pending entries from a previous run are picked up by the next drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn open(
        path: &Path,
        config: &Config,
        remote: Arc<dyn RemoteApply>,
    ) -> Result<Self, QueueError> {
        let path: PathBuf = path.to_path_buf();
        let db = tokio::task::spawn_blocking(move || Database::open_at(&path))
            .await
            .map_err(|e| QueueError::Storage(format!("Failed to open database: {e}")))??;

        let kinds = config.kinds();
        let store: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::new(db, kinds.clone()));
        Self::new(store, kinds, remote, &config.sync).await
    }

    /// Record a mutation for later replay.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Validation` for undeclared entity types or
    /// operations and `QueueError::Storage` if the entry was not persisted.
    pub async fn enqueue(
        &self,
        entity_type: &str,
        operation: &str,
        payload: serde_json::Value,
    ) -> Result<EntryId, QueueError> {
        self.writer.enqueue(entity_type, operation, payload).await
    }

    /// Current status of an entry, `None` if unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn get_status(&self, id: EntryId) -> Result<Option<Status>, QueueError> {
        Ok(self.store.get(id).await?.map(|entry| entry.status))
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>, QueueError> {
        self.store.get(id).await
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn list(&self, status: Status) -> Result<Vec<QueueEntry>, QueueError> {
        self.store.list_by_status(status).await
    }

    /// Start a drain in the background; `false` if one is already running.
    pub fn trigger_sync(&self) -> bool {
        self.driver.trigger()
    }

    /// Run one drain cycle and wait for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the ready entries cannot be read.
    pub async fn drain_now(&self) -> Result<DrainOutcome, QueueError> {
        self.driver.drain().await
    }

    /// Report the current connectivity. Repeating the same state is a no-op.
    pub fn set_connectivity(&self, state: Connectivity) {
        self.connectivity.send_if_modified(|signal| signal.update(state));
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.driver.subscribe()
    }

    /// Start the connectivity monitor. Does nothing if already running.
    pub fn start(&self) {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            return;
        }

        *monitor = Some(
            ConnectivityMonitor::new(
                Arc::clone(&self.driver),
                self.connectivity.subscribe(),
                self.interval,
            )
            .start(),
        );
    }

    /// Stop the connectivity monitor and wait for it to exit.
    pub async fn stop(&self) {
        let handle = self.monitor.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.monitor.lock().is_some()
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.store.stats().await
    }

    /// Give a failed entry a fresh retry budget.
    ///
    /// The entry is replaced by a new pending copy at the end of the queue;
    /// the new id is returned.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::NotFound` for unknown ids and
    /// `QueueError::Validation` if the entry is not failed.
    pub async fn requeue(&self, id: EntryId) -> Result<EntryId, QueueError> {
        let new_id = self.store.requeue(id, self.writer.next_stamp()).await?;
        info!(old_id = %id, new_id = %new_id, "Requeued failed entry");
        Ok(new_id)
    }

    /// Requeue every failed entry, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the first store error; entries requeued before it stay
    /// requeued.
    pub async fn requeue_all_failed(&self) -> Result<Vec<EntryId>, QueueError> {
        let failed = self.store.list_by_status(Status::Failed).await?;
        let mut ids = Vec::with_capacity(failed.len());
        for entry in failed {
            ids.push(self.requeue(entry.id).await?);
        }
        Ok(ids)
    }

    /// Delete a synced or failed entry; `false` if the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::StillPending` for pending entries.
    pub async fn remove(&self, id: EntryId) -> Result<bool, QueueError> {
        self.store.remove(id).await
    }

    /// Delete synced entries older than `older_than`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn prune_synced(&self, older_than: Duration) -> Result<usize, QueueError> {
        let age = i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);
        let pruned = self.store.prune_synced(now_ms().saturating_sub(age)).await?;
        info!(pruned, "Pruned synced entries");
        Ok(pruned)
    }
}
