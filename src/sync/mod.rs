//! Replay of queued mutations.
//!
//! - [`remote`]: the `RemoteApply` seam to the backend
//! - [`policy`]: retry budget and backoff
//! - [`driver`]: drain cycles
//! - [`monitor`]: connectivity and periodic triggers
//! - [`http`]: an HTTP `RemoteApply`

pub mod driver;
pub mod http;
pub mod monitor;
pub mod policy;
pub mod remote;

pub use driver::{
    DrainOutcome, DrainReport, DriverConfig, ReplayFailure, Retention, SyncDriver, SyncEvent,
};
pub use http::HttpRemote;
pub use monitor::{Connectivity, ConnectivityMonitor, ConnectivitySignal, MonitorHandle};
pub use policy::{RetryDecision, RetryPolicy};
pub use remote::{RemoteApply, Unreachable};
