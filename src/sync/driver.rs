//! Sync driver: replays pending entries against the remote.
//!
//! One drain cycle snapshots the ready entries in enqueue order, splits them
//! into batches and dispatches each batch concurrently. Calls are started in
//! enqueue order; batches run one after another. A remote that reports
//! itself offline ends the cycle early and leaves the remaining entries
//! untouched for the next trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::policy::RetryPolicy;
use super::remote::RemoteApply;
use crate::error::{QueueError, RemoteApplyError};
use crate::queue::{now_ms, EntryId, Operation, QueueEntry, QueueStore, Status};

const EVENT_CAPACITY: usize = 256;

/// What happens to an entry once the remote accepted it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Retention {
    /// Keep synced entries for inspection until pruned
    #[default]
    Keep,
    /// Delete entries as soon as they are synced
    Remove,
}

/// Tunables for the drain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Entries dispatched concurrently per batch
    pub batch_size: usize,
    /// Upper bound on a single remote apply call
    pub apply_timeout: Duration,
    pub retention: Retention,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            apply_timeout: Duration::from_secs(15),
            retention: Retention::Keep,
        }
    }
}

/// A failed replay, kept in the drain report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayFailure {
    pub id: EntryId,
    pub entity_type: String,
    pub operation: Operation,
    pub message: String,
    /// Whether the entry ran out of retries during this cycle
    pub abandoned: bool,
}

/// Summary of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Entries that were ready when the cycle started
    pub ready: usize,
    pub synced: usize,
    /// Failed attempts that left the entry pending
    pub retried: usize,
    /// Entries that reached `failed` in this cycle
    pub failed: usize,
    /// Entries skipped because they vanished or were already settled
    pub skipped: usize,
    /// Entries left untouched, either after going offline or on store errors
    pub deferred: usize,
    /// The cycle ended early because the remote was unreachable
    pub aborted_offline: bool,
    pub failures: Vec<ReplayFailure>,
}

impl DrainReport {
    /// Entries whose outcome was recorded during this cycle.
    #[must_use]
    pub const fn processed(&self) -> usize {
        self.synced + self.retried + self.failed + self.skipped
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ready == 0
    }

    fn record(&mut self, outcome: ReplayOutcome) {
        match outcome {
            ReplayOutcome::Synced => self.synced += 1,
            ReplayOutcome::Retrying(failure) => {
                self.retried += 1;
                self.failures.push(failure);
            },
            ReplayOutcome::Failed(failure) => {
                self.failed += 1;
                self.failures.push(failure);
            },
            ReplayOutcome::Skipped => self.skipped += 1,
            ReplayOutcome::Offline => self.aborted_offline = true,
            ReplayOutcome::Deferred => {},
        }
    }
}

/// Result of a `drain` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// Another cycle was in progress; the request was coalesced into it.
    AlreadyRunning,
}

/// Progress notifications published by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    DrainStarted { ready: usize },
    Synced { id: EntryId },
    Retrying {
        id: EntryId,
        retry_count: u32,
        error: String,
    },
    Failed {
        id: EntryId,
        retry_count: u32,
        error: String,
    },
    /// Emitted once per completed cycle, including empty ones.
    DrainFinished(DrainReport),
}

#[derive(Debug)]
enum ReplayOutcome {
    Synced,
    Retrying(ReplayFailure),
    Failed(ReplayFailure),
    Skipped,
    Offline,
    Deferred,
}

/// Clears the draining flag when the cycle ends, including on panic.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Replays the queue against a [`RemoteApply`] collaborator.
///
/// At most one drain cycle runs at a time per driver; concurrent requests
/// are coalesced rather than queued.
pub struct SyncDriver {
    store: Arc<dyn QueueStore>,
    remote: Arc<dyn RemoteApply>,
    policy: RetryPolicy,
    config: DriverConfig,
    draining: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncDriver {
    #[must_use]
    pub fn new(
        store: Arc<dyn QueueStore>,
        remote: Arc<dyn RemoteApply>,
        policy: RetryPolicy,
        config: DriverConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            remote,
            policy,
            config,
            draining: AtomicBool::new(false),
            events,
        }
    }

    /// Receive progress events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Run one drain cycle to completion on the current task.
    ///
    /// # Errors
    ///
    /// Returns an error only if the ready entries cannot be read. Failures
    /// while replaying individual entries are recorded on the entries and
    /// logged, never returned.
    pub async fn drain(&self) -> Result<DrainOutcome, QueueError> {
        let report = {
            let Some(_guard) = DrainGuard::acquire(&self.draining) else {
                debug!("Drain already in progress, coalescing request");
                return Ok(DrainOutcome::AlreadyRunning);
            };
            self.run_cycle().await?
        };

        // Guard already released: listeners may trigger the next cycle
        self.emit(SyncEvent::DrainFinished(report.clone()));
        Ok(DrainOutcome::Completed(report))
    }

    /// Start a drain cycle in the background.
    ///
    /// Returns `false` if a cycle is already running. Must be called from
    /// within a Tokio runtime.
    pub fn trigger(self: &Arc<Self>) -> bool {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Drain already in progress, trigger coalesced");
            return false;
        }

        let driver = Arc::clone(self);
        tokio::spawn(async move {
            let result = {
                let _guard = DrainGuard(&driver.draining);
                driver.run_cycle().await
            };
            match result {
                Ok(report) => driver.emit(SyncEvent::DrainFinished(report)),
                Err(e) => error!(error = %e, "Drain cycle failed"),
            }
        });
        true
    }

    async fn run_cycle(&self) -> Result<DrainReport, QueueError> {
        let entries = self.store.list_ready(now_ms()).await?;
        let mut report = DrainReport {
            ready: entries.len(),
            ..DrainReport::default()
        };
        self.emit(SyncEvent::DrainStarted { ready: report.ready });

        if !entries.is_empty() {
            info!(ready = report.ready, "Draining mutation queue");
        }

        let offline = AtomicBool::new(false);
        for batch in entries.chunks(self.config.batch_size.max(1)) {
            if offline.load(Ordering::Acquire) {
                break;
            }

            let outcomes = join_all(batch.iter().map(|entry| self.replay(entry, &offline))).await;
            for outcome in outcomes {
                report.record(outcome);
            }
        }

        report.deferred = report.ready - report.processed();
        if report.aborted_offline {
            info!(
                deferred = report.deferred,
                "Remote unreachable, drain cycle stopped"
            );
        } else if !report.is_empty() {
            info!(
                synced = report.synced,
                retried = report.retried,
                failed = report.failed,
                "Drain cycle finished"
            );
        }

        Ok(report)
    }

    async fn replay(&self, entry: &QueueEntry, offline: &AtomicBool) -> ReplayOutcome {
        if offline.load(Ordering::Acquire) {
            return ReplayOutcome::Deferred;
        }

        let timeout = self.config.apply_timeout;
        let result = match tokio::time::timeout(timeout, self.remote.apply(entry)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteApplyError::Timeout(timeout)),
        };

        match result {
            Ok(()) => self.mark_synced(entry).await,
            Err(e) if e.is_offline() => {
                offline.store(true, Ordering::Release);
                debug!(entry_id = %entry.id, error = %e, "Remote offline");
                ReplayOutcome::Offline
            },
            Err(e) => self.mark_failed(entry, &e).await,
        }
    }

    async fn mark_synced(&self, entry: &QueueEntry) -> ReplayOutcome {
        match self.store.update_status(entry.id, Status::Synced, None).await {
            Ok(()) => {},
            Err(e) => return Self::store_error(entry, &e),
        }

        debug!(entry_id = %entry.id, entity_type = %entry.entity_type, "Entry synced");
        self.emit(SyncEvent::Synced { id: entry.id });

        if self.config.retention == Retention::Remove {
            if let Err(e) = self.store.remove(entry.id).await {
                warn!(entry_id = %entry.id, error = %e, "Failed to remove synced entry");
            }
        }
        ReplayOutcome::Synced
    }

    async fn mark_failed(&self, entry: &QueueEntry, cause: &RemoteApplyError) -> ReplayOutcome {
        let update = self.policy.failure_update(entry, cause, now_ms());

        match self.store.record_failure(entry.id, &update).await {
            Ok(true) => {},
            Ok(false) => {
                debug!(entry_id = %entry.id, "Failure already recorded");
                return ReplayOutcome::Skipped;
            },
            Err(e) => return Self::store_error(entry, &e),
        }

        let failure = ReplayFailure {
            id: entry.id,
            entity_type: entry.entity_type.clone(),
            operation: entry.operation,
            message: update.error.clone(),
            abandoned: update.status == Status::Failed,
        };

        if failure.abandoned {
            error!(
                entry_id = %entry.id,
                entity_type = %entry.entity_type,
                operation = %entry.operation,
                retry_count = update.retry_count,
                error = %cause,
                "Entry failed permanently"
            );
            self.emit(SyncEvent::Failed {
                id: entry.id,
                retry_count: update.retry_count,
                error: update.error,
            });
            ReplayOutcome::Failed(failure)
        } else {
            warn!(
                entry_id = %entry.id,
                retry_count = update.retry_count,
                next_retry_at = ?update.next_retry_at,
                error = %cause,
                "Replay failed, will retry"
            );
            self.emit(SyncEvent::Retrying {
                id: entry.id,
                retry_count: update.retry_count,
                error: update.error,
            });
            ReplayOutcome::Retrying(failure)
        }
    }

    fn store_error(entry: &QueueEntry, e: &QueueError) -> ReplayOutcome {
        match e {
            QueueError::NotFound(_) => {
                warn!(entry_id = %entry.id, "Entry disappeared during drain, skipping");
                ReplayOutcome::Skipped
            },
            QueueError::InvalidTransition { .. } => {
                warn!(entry_id = %entry.id, error = %e, "Entry already settled, skipping");
                ReplayOutcome::Skipped
            },
            _ => {
                error!(entry_id = %entry.id, error = %e, "Could not record replay outcome");
                ReplayOutcome::Deferred
            },
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
