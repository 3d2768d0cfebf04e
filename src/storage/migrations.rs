//! Database migrations for replayq.
//!
//! Each migration is a function that upgrades the schema by one version.
//! Migrations are run automatically when the database is opened.

use rusqlite::Connection;

use crate::error::QueueError;

/// Current schema version.
const CURRENT_VERSION: i32 = 2;

/// Get the current schema version from the database.
///
/// Returns 0 if no version has been set (new database).
pub fn get_version(conn: &Connection) -> Result<i32, QueueError> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| QueueError::Storage(format!("Failed to get schema version: {e}")))?;

    Ok(version)
}

/// Set the schema version in the database.
fn set_version(conn: &Connection, version: i32) -> Result<(), QueueError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| QueueError::Storage(format!("Failed to set schema version: {e}")))
}

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<(), QueueError> {
    let current = get_version(conn)?;

    if current >= CURRENT_VERSION {
        return Ok(());
    }

    for version in (current + 1)..=CURRENT_VERSION {
        apply(conn, version)?;
    }

    Ok(())
}

/// Run one migration and record its version in a single transaction.
fn apply(conn: &Connection, version: i32) -> Result<(), QueueError> {
    let tx = conn.unchecked_transaction().map_err(|e| {
        QueueError::Storage(format!("Failed to begin migration v{version}: {e}"))
    })?;

    run_migration(&tx, version)?;
    set_version(&tx, version)?;

    tx.commit()
        .map_err(|e| QueueError::Storage(format!("Failed to commit migration v{version}: {e}")))
}

/// Run a specific migration.
fn run_migration(conn: &Connection, version: i32) -> Result<(), QueueError> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(QueueError::Storage(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: the mutation queue.
///
/// `enqueued_at` is milliseconds since epoch and orders replay within a
/// status; the composite index serves `list_by_status` without a scan.
fn migrate_v1(conn: &Connection) -> Result<(), QueueError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS mutation_queue (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            operation TEXT NOT NULL,
            payload TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            last_attempt_at INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_mutation_queue_status
        ON mutation_queue(status, enqueued_at);
        ",
    )
    .map_err(|e| QueueError::Storage(format!("Migration v1 failed: {e}")))
}

/// Migration v2: per-entry backoff.
fn migrate_v2(conn: &Connection) -> Result<(), QueueError> {
    conn.execute_batch("ALTER TABLE mutation_queue ADD COLUMN next_retry_at INTEGER;")
        .map_err(|e| QueueError::Storage(format!("Migration v2 failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_create_queue_table() {
        let conn = Connection::open_in_memory().unwrap();

        run(&conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);

        conn.execute(
            "INSERT INTO mutation_queue (id, entity_type, operation, payload, enqueued_at, next_retry_at)
             VALUES ('a1', 'student', 'create', '{\"name\":\"A\"}', 1000, NULL)",
            [],
        )
        .unwrap();

        let (status, retries): (String, i64) = conn
            .query_row(
                "SELECT status, retry_count FROM mutation_queue WHERE id = 'a1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "pending");
        assert_eq!(retries, 0);
    }

    #[test]
    fn test_upgrade_from_v1() {
        let conn = Connection::open_in_memory().unwrap();
        migrate_v1(&conn).unwrap();
        set_version(&conn, 1).unwrap();

        run(&conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
        conn.execute("UPDATE mutation_queue SET next_retry_at = 5", [])
            .unwrap();
    }

    #[test]
    fn test_failed_migration_keeps_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate_v1(&conn).unwrap();
        set_version(&conn, 1).unwrap();
        conn.execute_batch("ALTER TABLE mutation_queue ADD COLUMN next_retry_at INTEGER;")
            .unwrap();

        assert!(run(&conn).is_err());
        assert_eq!(get_version(&conn).unwrap(), 1);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_unknown_version_rolls_back() {
        let conn = Connection::open_in_memory().unwrap();

        assert!(apply(&conn, CURRENT_VERSION + 1).is_err());
        assert_eq!(get_version(&conn).unwrap(), 0);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_migration_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run(&conn).unwrap();
        run(&conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_get_version_new_database() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_version(&conn).unwrap(), 0);
    }
}
