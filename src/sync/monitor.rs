//! Connectivity monitor: decides when the driver should drain.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::driver::SyncDriver;

/// Reachability of the remote, as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    #[must_use]
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Latest connectivity plus the number of offline-to-online transitions
/// seen so far.
///
/// A `watch` channel only keeps the newest value, so a quick
/// offline/online flap would otherwise reach the monitor as no change at
/// all. The counter survives the flap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivitySignal {
    pub state: Connectivity,
    pub restored: u64,
}

impl ConnectivitySignal {
    #[must_use]
    pub const fn new(state: Connectivity) -> Self {
        Self { state, restored: 0 }
    }

    /// Apply a reported state; `false` if nothing changed.
    pub fn update(&mut self, state: Connectivity) -> bool {
        if self.state == state {
            return false;
        }
        if state.is_online() {
            self.restored += 1;
        }
        self.state = state;
        true
    }
}

/// Triggers a drain on every offline-to-online transition and on a fixed
/// interval while online.
pub struct ConnectivityMonitor {
    driver: Arc<SyncDriver>,
    signal: watch::Receiver<ConnectivitySignal>,
    interval: Duration,
}

impl ConnectivityMonitor {
    #[must_use]
    pub const fn new(
        driver: Arc<SyncDriver>,
        signal: watch::Receiver<ConnectivitySignal>,
        interval: Duration,
    ) -> Self {
        Self {
            driver,
            signal,
            interval,
        }
    }

    /// Spawn the monitor task.
    ///
    /// The task runs until [`MonitorHandle::stop`] is called or the handle
    /// is dropped.
    #[must_use]
    pub fn start(mut self) -> MonitorHandle {
        // Transitions after this point are seen even if the task starts late
        let current = *self.signal.borrow_and_update();
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(self.run(current, stopped));
        MonitorHandle {
            stop: Some(stop),
            task,
        }
    }

    async fn run(mut self, mut current: ConnectivitySignal, mut stopped: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut signal_open = true;
        info!(
            connectivity = ?current.state,
            interval_secs = self.interval.as_secs(),
            "Connectivity monitor started"
        );

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                changed = self.signal.changed(), if signal_open => {
                    if changed.is_err() {
                        debug!("Connectivity source closed, keeping periodic trigger only");
                        signal_open = false;
                        continue;
                    }
                    let next = *self.signal.borrow_and_update();
                    if next.restored != current.restored {
                        info!("Connectivity restored, draining queue");
                        self.driver.trigger();
                    } else if next.state != current.state {
                        info!("Connectivity lost, replay paused");
                    }
                    current = next;
                }
                _ = ticker.tick() => {
                    if current.state.is_online() {
                        self.driver.trigger();
                    }
                }
            }
        }

        info!("Connectivity monitor stopped");
    }
}

/// Owner of a running monitor task.
pub struct MonitorHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the monitor and wait for its task to exit.
    ///
    /// A drain cycle already in flight keeps running to completion.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            debug!(error = %e, "Monitor task ended abnormally");
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
