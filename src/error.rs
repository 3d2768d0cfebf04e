//! Error types for replayq.

use std::time::Duration;

use thiserror::Error;

use crate::queue::Status;

/// Errors produced by the queue, the sync driver and the CLI.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Unsupported entity type or operation, or an id collision on append.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No entry with the given id.
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// A status update that would break the entry lifecycle.
    #[error("Illegal transition for entry {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: Status, to: Status },

    /// Removal of an entry that has not reached a terminal status.
    #[error("Entry {0} is still pending and cannot be removed")]
    StillPending(String),

    /// The persistent store is unavailable or refused the write.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Failure reported by the remote apply collaborator.
    #[error("Remote apply failed: {0}")]
    Remote(#[from] RemoteApplyError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl QueueError {
    /// Exit code for the CLI.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) | Self::InvalidTransition { .. } | Self::StillPending(_) => 2,
            Self::NotFound(_) => 3,
            Self::Storage(_) | Self::Io(_) => 4,
            Self::Remote(_) => 5,
            Self::Config(_) | Self::Parse(_) => 1,
        }
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Outcome of a failed remote apply call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteApplyError {
    /// The client cannot reach the remote at all. Aborts the drain cycle.
    #[error("remote unreachable: {0}")]
    Offline(String),

    /// The remote answered but refused the mutation.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

impl RemoteApplyError {
    /// Whether this failure means the client is offline.
    #[must_use]
    pub const fn is_offline(&self) -> bool {
        matches!(self, Self::Offline(_))
    }
}
