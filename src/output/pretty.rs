use colored::{ColoredString, Colorize};

use crate::queue::{millis_to_utc, QueueEntry, QueueStats, Status};
use crate::sync::DrainReport;

/// Errors shown at the end of a drain summary.
const MAX_ERRORS_SHOWN: usize = 3;

fn status_icon(status: Status) -> ColoredString {
    match status {
        Status::Pending => "[ ]".white(),
        Status::Synced => "[x]".green(),
        Status::Failed => "[!]".red(),
    }
}

fn status_label(status: Status) -> ColoredString {
    match status {
        Status::Pending => status.as_str().yellow(),
        Status::Synced => status.as_str().green(),
        Status::Failed => status.as_str().red(),
    }
}

fn format_millis(ms: i64) -> String {
    millis_to_utc(ms).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format a list of entries as a pretty table
pub fn format_entries_pretty(entries: &[QueueEntry], title: &str) -> String {
    if entries.is_empty() {
        return format!("{title} (0 entries)\n  No entries");
    }

    let mut output = format!("{title} ({} entries)\n", entries.len());
    output.push_str(&"─".repeat(72));
    output.push('\n');

    for entry in entries {
        let mut line = format!(
            "{} {}  {} {}  {}",
            status_icon(entry.status),
            entry.id.to_string().dimmed(),
            entry.operation.as_str().bold(),
            entry.entity_type.cyan(),
            format_millis(entry.enqueued_at).dimmed()
        );

        if entry.retry_count > 0 {
            line.push_str(&format!("  {}", format!("retries: {}", entry.retry_count).yellow()));
        }

        output.push_str(&line);
        output.push('\n');
    }

    output
}

/// Format a single entry as pretty output
pub fn format_entry_pretty(entry: &QueueEntry) -> String {
    let mut output = format!(
        "{} {} {}\n",
        status_icon(entry.status),
        entry.operation.as_str().bold(),
        entry.entity_type.cyan()
    );
    output.push_str(&format!("  {}: {}\n", "ID".dimmed(), entry.id));
    output.push_str(&format!("  {}: {}\n", "Status".dimmed(), status_label(entry.status)));
    output.push_str(&format!(
        "  {}: {}\n",
        "Enqueued".dimmed(),
        format_millis(entry.enqueued_at)
    ));
    output.push_str(&format!("  {}: {}\n", "Retries".dimmed(), entry.retry_count));

    if let Some(at) = entry.last_attempt_at {
        output.push_str(&format!("  {}: {}\n", "Last attempt".dimmed(), format_millis(at)));
    }

    if let Some(at) = entry.next_retry_at {
        output.push_str(&format!("  {}: {}\n", "Next retry".dimmed(), format_millis(at)));
    }

    if let Some(error) = &entry.last_error {
        output.push_str(&format!("  {}: {}\n", "Last error".dimmed(), error.red()));
    }

    output.push_str(&format!("  {}: {}\n", "Payload".dimmed(), entry.payload));
    output
}

/// Format an entry status; unknown ids print `unknown`.
pub fn format_status_pretty(status: Option<Status>) -> String {
    status.map_or_else(|| "unknown".dimmed().to_string(), |s| status_label(s).to_string())
}

/// Format queue statistics as pretty output
pub fn format_stats_pretty(stats: &QueueStats) -> String {
    let mut lines = vec!["Mutation queue".to_string(), "─".repeat(40)];

    lines.push(format!("  {:<10}{}", "Pending", stats.pending.to_string().yellow()));
    lines.push(format!("  {:<10}{}", "Synced", stats.synced.to_string().green()));
    lines.push(format!("  {:<10}{}", "Failed", stats.failed.to_string().red()));

    if let Some(oldest) = stats.oldest_pending {
        lines.push(format!(
            "  {:<10}{}",
            "Oldest",
            format_millis(oldest).dimmed()
        ));
    }

    lines.join("\n")
}

/// Format a drain report for display.
#[must_use]
pub fn format_drain_report_pretty(report: &DrainReport) -> String {
    let mut lines = Vec::new();

    if report.is_empty() {
        return "Nothing to sync".to_string();
    }

    lines.push(format!("Sync completed: {} entries", report.ready));
    lines.push("─".repeat(40));

    if report.synced > 0 {
        lines.push(format!(
            "  {} {}",
            "✓".green(),
            format!("{} synced", report.synced).green()
        ));
    }

    if report.retried > 0 {
        lines.push(format!(
            "  {} {}",
            "↻".yellow(),
            format!("{} will retry", report.retried).yellow()
        ));
    }

    if report.failed > 0 {
        lines.push(format!(
            "  {} {}",
            "✗".red(),
            format!("{} failed", report.failed).red()
        ));
    }

    if report.skipped > 0 {
        lines.push(format!(
            "  {} {}",
            "○".dimmed(),
            format!("{} skipped", report.skipped).dimmed()
        ));
    }

    if report.deferred > 0 {
        lines.push(format!(
            "  {} {}",
            "…".yellow(),
            format!("{} deferred", report.deferred).yellow()
        ));
    }

    if report.aborted_offline {
        lines.push(format!("  {}", "Remote unreachable, stopped early".yellow()));
    }

    let errors: Vec<_> = report.failures.iter().take(MAX_ERRORS_SHOWN).collect();
    if !errors.is_empty() {
        lines.push(String::new());
        lines.push("Errors:".to_string());
        for failure in errors {
            lines.push(format!(
                "  - {} {} {}: {}",
                failure.operation,
                failure.entity_type,
                failure.id.to_string().dimmed(),
                failure.message
            ));
        }
    }

    lines.join("\n")
}
