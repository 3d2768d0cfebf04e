//! JSON output formatting for replayq.

use serde::Serialize;
use serde_json::json;

use crate::error::QueueError;
use crate::queue::{EntryId, QueueEntry, Status};

/// Format entries as JSON
///
/// # Errors
///
/// Returns `QueueError::Parse` if JSON serialization fails.
pub fn format_entries_json(entries: &[QueueEntry], list_name: &str) -> Result<String, QueueError> {
    let output = json!({
        "list": list_name,
        "count": entries.len(),
        "items": entries
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format an entry status as JSON; unknown ids report `"unknown"`.
///
/// # Errors
///
/// Returns `QueueError::Parse` if JSON serialization fails.
pub fn format_status_json(id: EntryId, status: Option<Status>) -> Result<String, QueueError> {
    let output = json!({
        "id": id,
        "status": status.map_or("unknown", |s| s.as_str()),
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Generic JSON formatter for any serializable type
///
/// # Errors
///
/// Returns `QueueError::Parse` if JSON serialization fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, QueueError> {
    Ok(serde_json::to_string_pretty(value)?)
}
