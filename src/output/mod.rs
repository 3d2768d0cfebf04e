//! Output formatting for replayq.
//!
//! This module provides formatters for queue entries, statistics and drain
//! reports in pretty and JSON form.

mod json;
mod pretty;

use crate::cli::args::OutputFormat;
use crate::error::QueueError;
use crate::queue::{EntryId, QueueEntry, QueueStats, Status};
use crate::sync::DrainReport;

pub use json::*;
pub use pretty::*;

/// Format queue entries based on output format
///
/// # Errors
///
/// Returns `QueueError::Parse` if JSON serialization fails.
pub fn format_entries(
    entries: &[QueueEntry],
    title: &str,
    format: OutputFormat,
) -> Result<String, QueueError> {
    match format {
        OutputFormat::Pretty => Ok(format_entries_pretty(entries, title)),
        OutputFormat::Json => format_entries_json(entries, title),
    }
}

/// Format a single entry based on output format
///
/// # Errors
///
/// Returns `QueueError::Parse` if JSON serialization fails.
pub fn format_entry(entry: &QueueEntry, format: OutputFormat) -> Result<String, QueueError> {
    match format {
        OutputFormat::Pretty => Ok(format_entry_pretty(entry)),
        OutputFormat::Json => to_json(entry),
    }
}

/// Format the status of one entry; `None` means unknown.
///
/// # Errors
///
/// Returns `QueueError::Parse` if JSON serialization fails.
pub fn format_status(
    id: EntryId,
    status: Option<Status>,
    format: OutputFormat,
) -> Result<String, QueueError> {
    match format {
        OutputFormat::Pretty => Ok(format_status_pretty(status)),
        OutputFormat::Json => format_status_json(id, status),
    }
}

/// Format queue statistics based on output format
///
/// # Errors
///
/// Returns `QueueError::Parse` if JSON serialization fails.
pub fn format_stats(stats: &QueueStats, format: OutputFormat) -> Result<String, QueueError> {
    match format {
        OutputFormat::Pretty => Ok(format_stats_pretty(stats)),
        OutputFormat::Json => to_json(stats),
    }
}

/// Format a drain report based on output format
///
/// # Errors
///
/// Returns `QueueError::Parse` if JSON serialization fails.
pub fn format_drain_report(report: &DrainReport, format: OutputFormat) -> Result<String, QueueError> {
    match format {
        OutputFormat::Pretty => Ok(format_drain_report_pretty(report)),
        OutputFormat::Json => to_json(report),
    }
}
