//! The remote apply seam.

use async_trait::async_trait;

use crate::error::RemoteApplyError;
use crate::queue::QueueEntry;

/// Performs one queued mutation against the authoritative backend.
///
/// Implementations receive the whole entry so they can use its id as an
/// idempotency key: delivery is at-least-once, and an entry whose outcome
/// was not recorded before a restart is replayed again.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteApply: Send + Sync {
    /// Apply `entry.operation` with `entry.payload` to `entry.entity_type`.
    ///
    /// Return `RemoteApplyError::Offline` when the remote cannot be reached
    /// at all; the driver then stops the current drain cycle.
    async fn apply(&self, entry: &QueueEntry) -> Result<(), RemoteApplyError>;
}

/// A remote that is never reachable.
///
/// Lets the queue be used with no backend configured; every drain defers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unreachable;

#[async_trait]
impl RemoteApply for Unreachable {
    async fn apply(&self, _entry: &QueueEntry) -> Result<(), RemoteApplyError> {
        Err(RemoteApplyError::Offline("no remote configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Operation;

    #[tokio::test]
    async fn test_unreachable_is_offline() {
        let entry = QueueEntry::new("student", Operation::Create, serde_json::json!({}), 1);
        assert!(Unreachable.apply(&entry).await.unwrap_err().is_offline());
    }
}
