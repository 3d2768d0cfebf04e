//! Command implementations for replayq.
//!
//! Each command takes an open [`SyncEngine`] and returns the text to print.

mod sync;

use std::io::Read;
use std::time::Duration;

pub use sync::{sync, watch};

use crate::cli::args::OutputFormat;
use crate::engine::SyncEngine;
use crate::error::QueueError;
use crate::output::{format_entries, format_entry, format_stats, format_status, to_json};
use crate::queue::{EntryId, Status};

/// Parse an entry id given on the command line.
///
/// # Errors
///
/// Returns `QueueError::Validation` if `raw` is not a UUID.
pub fn parse_id(raw: &str) -> Result<EntryId, QueueError> {
    EntryId::parse_str(raw.trim())
        .map_err(|e| QueueError::Validation(format!("invalid entry id '{raw}': {e}")))
}

fn read_payload(raw: &str) -> Result<serde_json::Value, QueueError> {
    if raw == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(serde_json::from_str(&buf)?);
    }
    Ok(serde_json::from_str(raw)?)
}

/// Execute enqueue command
///
/// # Errors
///
/// Returns an error if the payload is not valid JSON, the entity type or
/// operation is not accepted, or the entry could not be stored.
pub async fn enqueue(
    engine: &SyncEngine,
    entity_type: &str,
    operation: &str,
    payload: &str,
    format: OutputFormat,
) -> Result<String, QueueError> {
    let payload = read_payload(payload)?;
    let id = engine.enqueue(entity_type, operation, payload).await?;

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({ "id": id, "status": "pending" })),
        OutputFormat::Pretty => Ok(id.to_string()),
    }
}

/// Execute status command
///
/// # Errors
///
/// Returns an error if the id is malformed or the store cannot be read.
pub async fn status(
    engine: &SyncEngine,
    id: Option<&str>,
    format: OutputFormat,
) -> Result<String, QueueError> {
    match id {
        Some(raw) => {
            let id = parse_id(raw)?;
            let status = engine.get_status(id).await?;
            format_status(id, status, format)
        },
        None => format_stats(&engine.stats().await?, format),
    }
}

/// Execute show command
///
/// # Errors
///
/// Returns `QueueError::NotFound` for unknown ids.
pub async fn show(engine: &SyncEngine, id: &str, format: OutputFormat) -> Result<String, QueueError> {
    let id = parse_id(id)?;
    let entry = engine
        .get(id)
        .await?
        .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
    format_entry(&entry, format)
}

/// Execute list command
///
/// # Errors
///
/// Returns an error if the status filter is invalid or the store cannot be
/// read.
pub async fn list(
    engine: &SyncEngine,
    status: Option<&str>,
    limit: usize,
    format: OutputFormat,
) -> Result<String, QueueError> {
    let statuses = match status {
        Some(raw) => vec![raw.parse::<Status>()?],
        None => vec![Status::Pending, Status::Failed, Status::Synced],
    };

    let mut entries = Vec::new();
    for status in &statuses {
        entries.extend(engine.list(*status).await?);
    }
    if statuses.len() > 1 {
        entries.sort_by_key(|e| e.enqueued_at);
    }
    entries.truncate(limit);

    let title = status.map_or_else(|| "Queue".to_string(), |s| format!("Queue ({s})"));
    format_entries(&entries, &title, format)
}

/// Execute requeue command
///
/// # Errors
///
/// Returns an error if the entry is unknown or not failed.
pub async fn requeue(
    engine: &SyncEngine,
    id: Option<&str>,
    all: bool,
    format: OutputFormat,
) -> Result<String, QueueError> {
    let ids = match id {
        Some(raw) if !all => vec![engine.requeue(parse_id(raw)?).await?],
        _ => engine.requeue_all_failed().await?,
    };

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({ "count": ids.len(), "ids": ids })),
        OutputFormat::Pretty => {
            if ids.is_empty() {
                return Ok("No failed entries to requeue".to_string());
            }
            let mut lines = vec![format!("Requeued {} entries:", ids.len())];
            lines.extend(ids.iter().map(|id| format!("  {id}")));
            Ok(lines.join("\n"))
        },
    }
}

/// Execute remove command
///
/// # Errors
///
/// Returns `QueueError::StillPending` for pending entries and
/// `QueueError::NotFound` for unknown ids.
pub async fn remove(engine: &SyncEngine, id: &str, format: OutputFormat) -> Result<String, QueueError> {
    let id = parse_id(id)?;
    if !engine.remove(id).await? {
        return Err(QueueError::NotFound(id.to_string()));
    }

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({ "id": id, "removed": true })),
        OutputFormat::Pretty => Ok(format!("Removed entry: {id}")),
    }
}

/// Execute prune command
///
/// # Errors
///
/// Returns an error if the store cannot be written.
pub async fn prune(
    engine: &SyncEngine,
    older_than_hours: u64,
    format: OutputFormat,
) -> Result<String, QueueError> {
    let age = Duration::from_secs(older_than_hours.saturating_mul(3600));
    let pruned = engine.prune_synced(age).await?;

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({ "pruned": pruned })),
        OutputFormat::Pretty => Ok(format!(
            "Pruned {pruned} synced entries older than {older_than_hours}h"
        )),
    }
}
