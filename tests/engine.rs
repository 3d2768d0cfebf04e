//! End-to-end behaviour of the engine over a real `SQLite` store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::{broadcast, Notify};

use replayq::config::{Config, SyncConfig};
use replayq::queue::{QueueStore, SqliteQueueStore, SupportedKinds};
use replayq::{
    Connectivity, DrainOutcome, DrainReport, QueueEntry, QueueError, RemoteApply,
    RemoteApplyError, Status, SyncEngine, SyncEvent,
};

/// Records the `n` field of every payload it is asked to apply.
#[derive(Default)]
struct Recording {
    seen: Mutex<Vec<i64>>,
    fail_with: Option<RemoteApplyError>,
}

impl Recording {
    fn failing(error: RemoteApplyError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl RemoteApply for Recording {
    async fn apply(&self, entry: &QueueEntry) -> Result<(), RemoteApplyError> {
        let n = entry.payload["n"].as_i64().unwrap_or(-1);
        self.seen.lock().push(n);
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

/// Holds every call until released.
#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
    calls: AtomicUsize,
}

#[async_trait]
impl RemoteApply for Gate {
    async fn apply(&self, _entry: &QueueEntry) -> Result<(), RemoteApplyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

fn kinds() -> SupportedKinds {
    SupportedKinds::new(["student", "course"])
}

async fn engine_with(
    remote: Arc<dyn RemoteApply>,
    config: &SyncConfig,
) -> (SyncEngine, Arc<SqliteQueueStore>) {
    let store = Arc::new(SqliteQueueStore::in_memory(kinds()).unwrap());
    let engine = SyncEngine::new(store.clone(), kinds(), remote, config)
        .await
        .unwrap();
    (engine, store)
}

async fn next_report(events: &mut broadcast::Receiver<SyncEvent>) -> DrainReport {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(SyncEvent::DrainFinished(report)) = events.recv().await {
                return report;
            }
        }
    })
    .await
    .expect("drain should finish")
}

fn completed(outcome: DrainOutcome) -> DrainReport {
    match outcome {
        DrainOutcome::Completed(report) => report,
        DrainOutcome::AlreadyRunning => panic!("expected a completed drain"),
    }
}

#[tokio::test]
async fn offline_entry_syncs_after_coming_online() {
    let remote = Arc::new(Recording::default());
    let (engine, _store) = engine_with(remote.clone(), &SyncConfig::default()).await;
    let mut events = engine.subscribe();

    engine.set_connectivity(Connectivity::Offline);
    engine.start();

    let id = engine
        .enqueue("student", "create", json!({"name": "A"}))
        .await
        .unwrap();
    assert_eq!(engine.get_status(id).await.unwrap(), Some(Status::Pending));

    engine.set_connectivity(Connectivity::Online);
    let report = next_report(&mut events).await;

    assert_eq!(report.synced, 1);
    assert_eq!(engine.get_status(id).await.unwrap(), Some(Status::Synced));
    engine.stop().await;
}

#[tokio::test]
async fn quick_offline_online_flap_still_drains() {
    let remote = Arc::new(Recording::default());
    let config = SyncConfig {
        interval_secs: 3600,
        ..SyncConfig::default()
    };
    let (engine, _store) = engine_with(remote.clone(), &config).await;
    let mut events = engine.subscribe();

    // The first tick drains the empty queue right away
    engine.start();
    assert!(next_report(&mut events).await.is_empty());

    let id = engine.enqueue("student", "create", json!({"n": 7})).await.unwrap();
    engine.set_connectivity(Connectivity::Offline);
    engine.set_connectivity(Connectivity::Online);

    let report = next_report(&mut events).await;
    assert_eq!(report.synced, 1);
    assert_eq!(engine.get_status(id).await.unwrap(), Some(Status::Synced));
    assert_eq!(*remote.seen.lock(), vec![7]);
    engine.stop().await;
}

#[tokio::test]
async fn failing_entry_ends_failed_after_max_retries() {
    let remote = Arc::new(Recording::failing(RemoteApplyError::Rejected {
        status: 503,
        message: "unavailable".to_string(),
    }));
    let (engine, _store) = engine_with(remote.clone(), &SyncConfig::default()).await;

    let id = engine.enqueue("student", "update", json!({"n": 1})).await.unwrap();

    for expected in 1..=2 {
        completed(engine.drain_now().await.unwrap());
        let entry = engine.get(id).await.unwrap().unwrap();
        assert_eq!(entry.status, Status::Pending);
        assert_eq!(entry.retry_count, expected);
    }

    let report = completed(engine.drain_now().await.unwrap());
    assert_eq!(report.failed, 1);

    let entry = engine.get(id).await.unwrap().unwrap();
    assert_eq!(entry.status, Status::Failed);
    assert_eq!(entry.retry_count, 3);
    assert!(entry.last_error.unwrap().contains("503"));

    // Failed entries wait for manual action
    let report = completed(engine.drain_now().await.unwrap());
    assert!(report.is_empty());
    assert_eq!(remote.calls(), 3);
}

#[tokio::test]
async fn unknown_entity_type_is_rejected_and_not_stored() {
    let (engine, _store) = engine_with(Arc::new(Recording::default()), &SyncConfig::default()).await;

    let err = engine
        .enqueue("unknown", "create", json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, QueueError::Validation(_)));
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.pending + stats.synced + stats.failed, 0);
}

#[tokio::test]
async fn replay_follows_enqueue_order() {
    let remote = Arc::new(Recording::default());
    let (engine, _store) = engine_with(remote.clone(), &SyncConfig::default()).await;

    for n in 0..25 {
        let entity = if n % 3 == 0 { "course" } else { "student" };
        engine.enqueue(entity, "update", json!({ "n": n })).await.unwrap();
    }

    let report = completed(engine.drain_now().await.unwrap());
    assert_eq!(report.synced, 25);

    let seen = remote.seen.lock().clone();
    assert_eq!(seen, (0..25).collect::<Vec<_>>());
}

#[tokio::test]
async fn pending_entries_survive_restart() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("queue.db");
    let mut config = Config::default();
    config.entity_types = vec!["student".to_string()];

    let ids = {
        let engine = SyncEngine::open(&db_path, &config, Arc::new(Recording::default()))
            .await
            .unwrap();
        let mut ids = Vec::new();
        for n in 0..3 {
            ids.push(engine.enqueue("student", "create", json!({ "n": n })).await.unwrap());
        }
        ids
    };

    let remote = Arc::new(Recording::default());
    let engine = SyncEngine::open(&db_path, &config, remote.clone())
        .await
        .unwrap();

    for id in &ids {
        assert_eq!(engine.get_status(*id).await.unwrap(), Some(Status::Pending));
    }

    // New entries sort after recovered ones
    engine.enqueue("student", "create", json!({"n": 3})).await.unwrap();
    let pending = engine.list(Status::Pending).await.unwrap();
    assert_eq!(pending.len(), 4);
    assert!(pending.windows(2).all(|w| w[0].enqueued_at < w[1].enqueued_at));

    completed(engine.drain_now().await.unwrap());
    assert_eq!(*remote.seen.lock(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn terminal_states_never_flip() {
    let remote = Arc::new(Recording::default());
    let (engine, store) = engine_with(remote, &SyncConfig::default()).await;

    let id = engine.enqueue("course", "delete", json!({"id": 9})).await.unwrap();
    completed(engine.drain_now().await.unwrap());

    let err = store.update_status(id, Status::Failed, None).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { .. }));

    // Repeating the same terminal status is a no-op
    store.update_status(id, Status::Synced, None).await.unwrap();
    assert_eq!(engine.get_status(id).await.unwrap(), Some(Status::Synced));
}

#[tokio::test]
async fn concurrent_triggers_are_coalesced() {
    let gate = Arc::new(Gate::default());
    let (engine, _store) = engine_with(gate.clone(), &SyncConfig::default()).await;
    let mut events = engine.subscribe();

    engine.enqueue("student", "create", json!({})).await.unwrap();

    assert!(engine.trigger_sync());
    gate.entered.notified().await;

    assert!(!engine.trigger_sync());
    assert_eq!(
        engine.drain_now().await.unwrap(),
        DrainOutcome::AlreadyRunning
    );

    gate.release.notify_one();
    let report = next_report(&mut events).await;

    assert_eq!(report.synced, 1);
    assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn offline_remote_leaves_queue_untouched() {
    let remote = Arc::new(Recording::failing(RemoteApplyError::Offline(
        "connection refused".to_string(),
    )));
    let (engine, _store) = engine_with(remote.clone(), &SyncConfig::default()).await;

    let id = engine.enqueue("student", "create", json!({"n": 0})).await.unwrap();
    engine.enqueue("student", "create", json!({"n": 1})).await.unwrap();

    let report = completed(engine.drain_now().await.unwrap());
    assert!(report.aborted_offline);
    assert_eq!(report.deferred, 2);

    let entry = engine.get(id).await.unwrap().unwrap();
    assert_eq!(entry.status, Status::Pending);
    assert_eq!(entry.retry_count, 0);
}

#[tokio::test]
async fn backoff_delays_the_next_attempt() {
    let remote = Arc::new(Recording::failing(RemoteApplyError::Other("boom".to_string())));
    let config = SyncConfig {
        backoff_base_ms: 60_000,
        ..SyncConfig::default()
    };
    let (engine, _store) = engine_with(remote.clone(), &config).await;

    let id = engine.enqueue("student", "update", json!({})).await.unwrap();

    completed(engine.drain_now().await.unwrap());
    let report = completed(engine.drain_now().await.unwrap());

    assert!(report.is_empty());
    assert_eq!(remote.calls(), 1);

    let entry = engine.get(id).await.unwrap().unwrap();
    assert_eq!(entry.retry_count, 1);
    assert!(entry.next_retry_at.unwrap() > entry.last_attempt_at.unwrap());
}
