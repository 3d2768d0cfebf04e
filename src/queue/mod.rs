//! The durable mutation queue.
//!
//! - [`entry`]: entry, operation and status types
//! - [`kinds`]: the entity types and operations an application declares
//! - [`store`]: durable, ordered storage of entries
//! - [`writer`]: the enqueue entry point

pub mod entry;
pub mod kinds;
pub mod store;
pub mod writer;

pub use entry::{millis_to_utc, now_ms, EntryId, Operation, QueueEntry, Status};
pub use kinds::SupportedKinds;
pub use store::{FailureUpdate, QueueStats, QueueStore, SqliteQueueStore};
pub use writer::{MonotonicClock, QueueWriter};
