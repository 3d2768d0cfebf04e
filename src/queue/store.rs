//! Durable queue store.
//!
//! [`QueueStore`] is the storage-agnostic contract the writer and the sync
//! driver program against. [`SqliteQueueStore`] implements it on top of the
//! local `SQLite` database; each operation is a single statement or a single
//! transaction, executed on the blocking pool.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use uuid::Uuid;

use super::entry::{now_ms, EntryId, Operation, QueueEntry, Status};
use super::kinds::SupportedKinds;
use crate::error::QueueError;
use crate::storage::Database;

/// One failed attempt, as decided by the retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureUpdate {
    /// `Pending` to retry, `Failed` to abandon
    pub status: Status,
    /// Retry count the caller observed before the attempt
    pub expected_retry_count: u32,
    /// Retry count after this failure
    pub retry_count: u32,
    pub next_retry_at: Option<i64>,
    pub error: String,
    pub attempted_at: i64,
}

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub synced: i64,
    pub failed: i64,
    /// Enqueue time of the oldest pending entry, milliseconds since epoch
    pub oldest_pending: Option<i64>,
}

/// Persistent, ordered storage for queue entries.
///
/// Every method is atomic with respect to concurrent callers. Listing
/// methods return a fresh snapshot on each call.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new pending entry.
    ///
    /// Fails with `QueueError::Validation` for undeclared entity types or
    /// operations and for id collisions.
    async fn append(&self, entry: &QueueEntry) -> Result<(), QueueError>;

    /// All entries with `status`, ordered by `enqueued_at` ascending.
    async fn list_by_status(&self, status: Status) -> Result<Vec<QueueEntry>, QueueError>;

    /// Pending entries whose backoff has elapsed at `now_ms`, in replay order.
    async fn list_ready(&self, now_ms: i64) -> Result<Vec<QueueEntry>, QueueError>;

    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>, QueueError>;

    /// Move one entry to `status`, optionally setting its retry count.
    ///
    /// Fails with `QueueError::NotFound` for unknown ids and with
    /// `QueueError::InvalidTransition` when leaving a terminal status.
    async fn update_status(
        &self,
        id: EntryId,
        status: Status,
        retry_count: Option<u32>,
    ) -> Result<(), QueueError>;

    /// Record a failed attempt: increment and status set in one write.
    ///
    /// Returns `false` when the entry's retry count no longer matches
    /// `expected_retry_count`, i.e. this failure was already recorded.
    async fn record_failure(&self, id: EntryId, update: &FailureUpdate)
        -> Result<bool, QueueError>;

    /// Delete a terminal entry. Removing an unknown id returns `false`.
    async fn remove(&self, id: EntryId) -> Result<bool, QueueError>;

    /// Largest `enqueued_at` in the store, used to seed the enqueue clock.
    async fn latest_enqueued_at(&self) -> Result<Option<i64>, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Replace a failed entry with a fresh pending copy; returns the new id.
    async fn requeue(&self, id: EntryId, enqueued_at: i64) -> Result<EntryId, QueueError>;

    /// Delete synced entries last touched before `before_ms`.
    async fn prune_synced(&self, before_ms: i64) -> Result<usize, QueueError>;
}

const COLUMNS: &str = "id, entity_type, operation, payload, enqueued_at, status, \
                       retry_count, last_error, last_attempt_at, next_retry_at";

/// `SQLite`-backed queue store.
#[derive(Clone)]
pub struct SqliteQueueStore {
    db: Arc<Mutex<Database>>,
    kinds: Arc<SupportedKinds>,
}

impl SqliteQueueStore {
    /// Create a store over an open database.
    #[must_use]
    pub fn new(db: Database, kinds: SupportedKinds) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            kinds: Arc::new(kinds),
        }
    }

    /// Create a store over a fresh in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory(kinds: SupportedKinds) -> Result<Self, QueueError> {
        Ok(Self::new(Database::open_in_memory()?, kinds))
    }

    /// Run `f` against the database on the blocking pool.
    async fn with_db<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        F: FnOnce(&mut Database) -> Result<T, QueueError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut guard = db.lock();
            f(&mut *guard)
        })
        .await
        .map_err(|e| QueueError::Storage(format!("Store task failed: {e}")))?
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn append(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        self.kinds.check(&entry.entity_type, entry.operation)?;
        if entry.status != Status::Pending || entry.retry_count != 0 {
            return Err(QueueError::Validation(
                "new entries must be pending with no retries".to_string(),
            ));
        }

        let entry = entry.clone();
        self.with_db(move |db| insert_entry(db.connection(), &entry))
            .await
    }

    async fn list_by_status(&self, status: Status) -> Result<Vec<QueueEntry>, QueueError> {
        self.with_db(move |db| {
            query_entries(
                db.connection(),
                &format!(
                    "SELECT {COLUMNS} FROM mutation_queue
                     WHERE status = ?1
                     ORDER BY enqueued_at ASC, rowid ASC"
                ),
                params![status.as_str()],
            )
        })
        .await
    }

    async fn list_ready(&self, now_ms: i64) -> Result<Vec<QueueEntry>, QueueError> {
        self.with_db(move |db| {
            query_entries(
                db.connection(),
                &format!(
                    "SELECT {COLUMNS} FROM mutation_queue
                     WHERE status = 'pending'
                       AND (next_retry_at IS NULL OR next_retry_at <= ?1)
                     ORDER BY enqueued_at ASC, rowid ASC"
                ),
                params![now_ms],
            )
        })
        .await
    }

    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>, QueueError> {
        self.with_db(move |db| fetch_entry(db.connection(), id)).await
    }

    async fn update_status(
        &self,
        id: EntryId,
        status: Status,
        retry_count: Option<u32>,
    ) -> Result<(), QueueError> {
        self.with_db(move |db| {
            let tx = db.connection_mut().transaction()?;

            let (from, current_retries) = fetch_state(&tx, id)?
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

            if !from.can_transition_to(status) {
                return Err(QueueError::InvalidTransition {
                    id: id.to_string(),
                    from,
                    to: status,
                });
            }
            if from.is_terminal() {
                // Same terminal status again
                return Ok(());
            }
            if let Some(count) = retry_count {
                if count < current_retries {
                    return Err(QueueError::Validation(format!(
                        "retry count for {id} cannot decrease ({current_retries} -> {count})"
                    )));
                }
            }

            tx.execute(
                r"UPDATE mutation_queue SET
                  status = ?1,
                  retry_count = COALESCE(?2, retry_count),
                  last_attempt_at = ?3,
                  next_retry_at = CASE WHEN ?1 = 'pending' THEN next_retry_at ELSE NULL END
                  WHERE id = ?4",
                params![status.as_str(), retry_count, now_ms(), id.to_string()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn record_failure(
        &self,
        id: EntryId,
        update: &FailureUpdate,
    ) -> Result<bool, QueueError> {
        if update.status == Status::Synced || update.retry_count < update.expected_retry_count {
            return Err(QueueError::Validation(format!(
                "invalid failure update for {id}"
            )));
        }

        let update = update.clone();
        self.with_db(move |db| {
            let conn = db.connection();
            let changed = conn.execute(
                r"UPDATE mutation_queue SET
                  status = ?1,
                  retry_count = ?2,
                  next_retry_at = ?3,
                  last_error = ?4,
                  last_attempt_at = ?5
                  WHERE id = ?6 AND status = 'pending' AND retry_count = ?7",
                params![
                    update.status.as_str(),
                    update.retry_count,
                    update.next_retry_at,
                    update.error,
                    update.attempted_at,
                    id.to_string(),
                    update.expected_retry_count,
                ],
            )?;

            if changed == 1 {
                return Ok(true);
            }

            match fetch_state(conn, id)? {
                None => Err(QueueError::NotFound(id.to_string())),
                Some((from, _)) if from.is_terminal() => Err(QueueError::InvalidTransition {
                    id: id.to_string(),
                    from,
                    to: update.status,
                }),
                Some(_) => Ok(false),
            }
        })
        .await
    }

    async fn remove(&self, id: EntryId) -> Result<bool, QueueError> {
        self.with_db(move |db| {
            let tx = db.connection_mut().transaction()?;
            match fetch_state(&tx, id)? {
                None => Ok(false),
                Some((Status::Pending, _)) => Err(QueueError::StillPending(id.to_string())),
                Some(_) => {
                    tx.execute(
                        "DELETE FROM mutation_queue WHERE id = ?1",
                        [id.to_string()],
                    )?;
                    tx.commit()?;
                    Ok(true)
                }
            }
        })
        .await
    }

    async fn latest_enqueued_at(&self) -> Result<Option<i64>, QueueError> {
        self.with_db(|db| {
            let latest: Option<i64> = db.connection().query_row(
                "SELECT MAX(enqueued_at) FROM mutation_queue",
                [],
                |row| row.get(0),
            )?;
            Ok(latest)
        })
        .await
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.with_db(|db| {
            let conn = db.connection();
            let mut stats = QueueStats::default();

            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM mutation_queue GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                match status.parse::<Status>()? {
                    Status::Pending => stats.pending = count,
                    Status::Synced => stats.synced = count,
                    Status::Failed => stats.failed = count,
                }
            }

            stats.oldest_pending = conn.query_row(
                "SELECT MIN(enqueued_at) FROM mutation_queue WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )?;

            Ok(stats)
        })
        .await
    }

    async fn requeue(&self, id: EntryId, enqueued_at: i64) -> Result<EntryId, QueueError> {
        self.with_db(move |db| {
            let tx = db.connection_mut().transaction()?;

            let old = fetch_entry(&tx, id)?.ok_or_else(|| QueueError::NotFound(id.to_string()))?;
            if old.status != Status::Failed {
                return Err(QueueError::Validation(format!(
                    "only failed entries can be requeued ({id} is {})",
                    old.status
                )));
            }

            let fresh = QueueEntry::new(old.entity_type, old.operation, old.payload, enqueued_at);
            insert_entry(&tx, &fresh)?;
            tx.execute("DELETE FROM mutation_queue WHERE id = ?1", [id.to_string()])?;
            tx.commit()?;

            Ok(fresh.id)
        })
        .await
    }

    async fn prune_synced(&self, before_ms: i64) -> Result<usize, QueueError> {
        self.with_db(move |db| {
            let rows = db.connection().execute(
                r"DELETE FROM mutation_queue
                  WHERE status = 'synced'
                    AND COALESCE(last_attempt_at, enqueued_at) < ?1",
                [before_ms],
            )?;
            Ok(rows)
        })
        .await
    }
}

fn insert_entry(conn: &Connection, entry: &QueueEntry) -> Result<(), QueueError> {
    let payload = serde_json::to_string(&entry.payload)?;

    let result = conn.execute(
        &format!("INSERT INTO mutation_queue ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        params![
            entry.id.to_string(),
            entry.entity_type,
            entry.operation.as_str(),
            payload,
            entry.enqueued_at,
            entry.status.as_str(),
            entry.retry_count,
            entry.last_error,
            entry.last_attempt_at,
            entry.next_retry_at,
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            Err(QueueError::Validation(format!(
                "entry id {} already exists",
                entry.id
            )))
        }
        Err(e) => Err(QueueError::Storage(format!("Failed to append entry: {e}"))),
    }
}

fn query_entries<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<QueueEntry>, QueueError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, row_to_entry)?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

fn fetch_entry(conn: &Connection, id: EntryId) -> Result<Option<QueueEntry>, QueueError> {
    let entry = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM mutation_queue WHERE id = ?1"),
            [id.to_string()],
            row_to_entry,
        )
        .optional()?;
    Ok(entry)
}

fn fetch_state(conn: &Connection, id: EntryId) -> Result<Option<(Status, u32)>, QueueError> {
    let state: Option<(String, u32)> = conn
        .query_row(
            "SELECT status, retry_count FROM mutation_queue WHERE id = ?1",
            [id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    state
        .map(|(status, retries)| Ok((status.parse()?, retries)))
        .transpose()
}

fn row_to_entry(row: &Row<'_>) -> Result<QueueEntry, rusqlite::Error> {
    let id: String = row.get(0)?;
    let operation: String = row.get(2)?;
    let payload: String = row.get(3)?;
    let status: String = row.get(5)?;

    Ok(QueueEntry {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?,
        entity_type: row.get(1)?,
        operation: operation
            .parse::<Operation>()
            .map_err(|e| conversion_error(2, e))?,
        payload: serde_json::from_str(&payload).map_err(|e| conversion_error(3, e))?,
        enqueued_at: row.get(4)?,
        status: status.parse::<Status>().map_err(|e| conversion_error(5, e))?,
        retry_count: row.get(6)?,
        last_error: row.get(7)?,
        last_attempt_at: row.get(8)?,
        next_retry_at: row.get(9)?,
    })
}

fn conversion_error<E>(column: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}
