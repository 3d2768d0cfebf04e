//! Queue entry types.
//!
//! A [`QueueEntry`] is one recorded intent to create, update or delete a
//! remote resource. Its payload is opaque to the engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Entry identifier, also used as the idempotency key for remote apply.
pub type EntryId = Uuid;

/// Mutation kinds the engine knows how to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// All operations, in declaration order.
    pub const ALL: [Self; 3] = [Self::Create, Self::Update, Self::Delete];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(QueueError::Validation(format!(
                "unsupported operation '{other}' (expected create, update or delete)"
            ))),
        }
    }
}

/// Lifecycle state of an entry.
///
/// `Pending` is the only non-terminal state. Legal transitions are
/// `pending -> synced`, `pending -> pending` and `pending -> failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Waiting to be replayed
    Pending,
    /// Accepted by the remote
    Synced,
    /// Retry budget exhausted, needs manual action
    Failed,
}

impl Status {
    /// Check if this status is terminal (no more automatic transitions).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Synced | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    /// Whether moving from `self` to `to` respects the lifecycle.
    ///
    /// Re-applying the same terminal status is accepted as a no-op.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        match self {
            Self::Pending => true,
            terminal => terminal == to,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(QueueError::Validation(format!("unknown status '{other}'"))),
        }
    }
}

/// A queued mutation with its replay bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Unique ID
    pub id: EntryId,
    /// Resource kind, one of the declared entity types
    pub entity_type: String,
    pub operation: Operation,
    /// Caller-supplied data, never inspected by the engine
    pub payload: serde_json::Value,
    /// Milliseconds since epoch; the replay ordering key
    pub enqueued_at: i64,
    pub status: Status,
    /// Failed replay attempts so far
    pub retry_count: u32,
    /// Last remote error message
    pub last_error: Option<String>,
    /// Last replay attempt, milliseconds since epoch
    pub last_attempt_at: Option<i64>,
    /// Earliest time the entry may be replayed again, when backoff is enabled
    pub next_retry_at: Option<i64>,
}

impl QueueEntry {
    /// Create a new pending entry with a fresh id.
    #[must_use]
    pub fn new(
        entity_type: impl Into<String>,
        operation: Operation,
        payload: serde_json::Value,
        enqueued_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            operation,
            payload,
            enqueued_at,
            status: Status::Pending,
            retry_count: 0,
            last_error: None,
            last_attempt_at: None,
            next_retry_at: None,
        }
    }
}

/// Current wall-clock time in milliseconds since epoch.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert milliseconds since epoch to a UTC timestamp.
#[must_use]
pub fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
