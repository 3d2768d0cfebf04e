//! replayq - an offline-first mutation queue
//!
//! Applications record create/update/delete intents with
//! [`SyncEngine::enqueue`] while the backend may be unreachable. Entries are
//! persisted in a local `SQLite` queue and replayed in enqueue order once
//! connectivity returns, with bounded retries per entry.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod output;
pub mod queue;
pub mod storage;
pub mod sync;

pub use cli::args::{Cli, Commands, OutputFormat};
pub use engine::SyncEngine;
pub use error::{QueueError, RemoteApplyError};
pub use queue::{EntryId, Operation, QueueEntry, Status};
pub use sync::{Connectivity, DrainOutcome, DrainReport, RemoteApply, SyncEvent};
