//! Replay commands.

use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli::args::OutputFormat;
use crate::engine::SyncEngine;
use crate::error::QueueError;
use crate::output::{format_drain_report, to_json};
use crate::sync::{Connectivity, DrainOutcome, DrainReport, HttpRemote, SyncEvent};

/// Execute sync command: one drain cycle, then report.
///
/// # Errors
///
/// Returns an error if the queue cannot be read.
pub async fn sync(engine: &SyncEngine, format: OutputFormat) -> Result<String, QueueError> {
    match engine.drain_now().await? {
        DrainOutcome::Completed(report) => format_drain_report(&report, format),
        DrainOutcome::AlreadyRunning => match format {
            OutputFormat::Json => to_json(&serde_json::json!({ "already_running": true })),
            OutputFormat::Pretty => Ok("A drain is already running".to_string()),
        },
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler, continuing without it");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, continuing without it");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Execute watch command.
///
/// Feeds health probes into the engine's connectivity signal and prints a
/// summary after every non-empty drain until interrupted.
///
/// # Errors
///
/// Returns an error if a drain report cannot be formatted.
pub async fn watch(
    engine: &SyncEngine,
    remote: &HttpRemote,
    probe_interval: Duration,
    format: OutputFormat,
) -> Result<String, QueueError> {
    engine.set_connectivity(remote.probe().await);
    let mut events = engine.subscribe();
    engine.start();

    let mut probe = tokio::time::interval(probe_interval);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut totals = DrainReport::default();
    let mut cycles = 0_usize;

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            _ = probe.tick() => {
                let state = remote.probe().await;
                if state == Connectivity::Offline {
                    info!("Remote health check failed");
                }
                engine.set_connectivity(state);
            }
            event = events.recv() => match event {
                Ok(SyncEvent::DrainFinished(report)) if !report.is_empty() => {
                    cycles += 1;
                    totals.synced += report.synced;
                    totals.retried += report.retried;
                    totals.failed += report.failed;
                    println!("{}", format_drain_report(&report, format)?);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Dropped sync events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    engine.stop().await;

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({
            "cycles": cycles,
            "synced": totals.synced,
            "retried": totals.retried,
            "failed": totals.failed,
        })),
        OutputFormat::Pretty => Ok(format!(
            "Stopped after {cycles} drain cycles: {} synced, {} retried, {} failed",
            totals.synced, totals.retried, totals.failed
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SyncConfig;
    use crate::queue::{SqliteQueueStore, SupportedKinds};
    use crate::sync::Unreachable;

    #[tokio::test]
    async fn test_sync_while_unreachable_defers() {
        let kinds = SupportedKinds::new(["student"]);
        let store = Arc::new(SqliteQueueStore::in_memory(kinds.clone()).unwrap());
        let engine = SyncEngine::new(store, kinds, Arc::new(Unreachable), &SyncConfig::default())
            .await
            .unwrap();
        engine
            .enqueue("student", "create", serde_json::json!({}))
            .await
            .unwrap();

        let output = sync(&engine, OutputFormat::Json).await.unwrap();
        assert!(output.contains("\"aborted_offline\": true"));
        assert!(output.contains("\"deferred\": 1"));
    }
}
