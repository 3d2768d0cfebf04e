//! Queue writer: the single entry point for recording deferred mutations.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::entry::{now_ms, EntryId, QueueEntry};
use super::kinds::SupportedKinds;
use super::store::QueueStore;
use crate::error::QueueError;

/// Enqueue timestamps that never go backwards.
///
/// Each stamp is `max(now, last + 1)`, so stamps are strictly increasing
/// within a process even when the wall clock steps back.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    /// Start after `last`, typically the newest stamp already persisted.
    #[must_use]
    pub const fn starting_after(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    /// Next stamp, in milliseconds since epoch.
    pub fn next(&self) -> i64 {
        self.next_from(now_ms())
    }

    fn next_from(&self, now: i64) -> i64 {
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Appends new pending entries to the store.
///
/// Performs no network access.
pub struct QueueWriter {
    store: Arc<dyn QueueStore>,
    kinds: Arc<SupportedKinds>,
    clock: Arc<MonotonicClock>,
}

impl QueueWriter {
    #[must_use]
    pub fn new(
        store: Arc<dyn QueueStore>,
        kinds: Arc<SupportedKinds>,
        clock: Arc<MonotonicClock>,
    ) -> Self {
        Self { store, kinds, clock }
    }

    /// Record a mutation intent and return its id.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Validation` for undeclared entity types or
    /// operations (nothing is stored), and `QueueError::Storage` when the
    /// store could not persist the entry. In both cases the write was NOT
    /// queued.
    pub async fn enqueue(
        &self,
        entity_type: &str,
        operation: &str,
        payload: serde_json::Value,
    ) -> Result<EntryId, QueueError> {
        let operation = self.kinds.validate(entity_type, operation)?;

        let entry = QueueEntry::new(entity_type, operation, payload, self.clock.next());
        self.store.append(&entry).await?;

        debug!(
            entry_id = %entry.id,
            entity_type,
            %operation,
            enqueued_at = entry.enqueued_at,
            "Queued mutation"
        );

        Ok(entry.id)
    }

    /// Stamp used for entries created outside `enqueue`, such as requeues.
    #[must_use]
    pub fn next_stamp(&self) -> i64 {
        self.clock.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{SqliteQueueStore, Status};
    use serde_json::json;

    fn create_writer() -> (QueueWriter, Arc<SqliteQueueStore>) {
        let kinds = SupportedKinds::new(["student"]);
        let store = Arc::new(SqliteQueueStore::in_memory(kinds.clone()).unwrap());
        let writer = QueueWriter::new(
            store.clone(),
            Arc::new(kinds),
            Arc::new(MonotonicClock::default()),
        );
        (writer, store)
    }

    #[test]
    fn test_clock_strictly_increasing() {
        let clock = MonotonicClock::starting_after(0);
        assert_eq!(clock.next_from(100), 100);
        assert_eq!(clock.next_from(100), 101);
        // Wall clock stepped back
        assert_eq!(clock.next_from(50), 102);
        assert_eq!(clock.next_from(500), 500);
    }

    #[test]
    fn test_clock_seeded_from_store() {
        let clock = MonotonicClock::starting_after(i64::from(i32::MAX));
        assert!(clock.next_from(10) > i64::from(i32::MAX));
    }

    #[tokio::test]
    async fn test_enqueue_creates_pending_entry() {
        let (writer, store) = create_writer();

        let id = writer
            .enqueue("student", "create", json!({"name": "A"}))
            .await
            .unwrap();

        let entry = store.get(id).await.unwrap().unwrap();
        assert_eq!(entry.status, Status::Pending);
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.payload, json!({"name": "A"}));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_unknown_entity() {
        let (writer, store) = create_writer();

        let err = writer
            .enqueue("unknown", "create", json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::Validation(_)));
        assert_eq!(store.stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_unknown_operation() {
        let (writer, _store) = create_writer();
        assert!(writer.enqueue("student", "patch", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_enqueue_stamps_are_ordered() {
        let (writer, store) = create_writer();

        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(writer.enqueue("student", "update", json!({ "n": n })).await.unwrap());
        }

        let pending = store.list_by_status(Status::Pending).await.unwrap();
        let listed: Vec<_> = pending.iter().map(|e| e.id).collect();
        assert_eq!(listed, ids);
        assert!(pending.windows(2).all(|w| w[0].enqueued_at < w[1].enqueued_at));
    }
}
