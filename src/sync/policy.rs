//! Retry and backoff policy for failed replays.

use std::time::Duration;

use crate::error::RemoteApplyError;
use crate::queue::{FailureUpdate, QueueEntry, Status};

/// What to do with an entry after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Keep the entry pending for a later drain cycle.
    Retry {
        retry_count: u32,
        next_retry_at: Option<i64>,
    },
    /// Retry budget exhausted; the entry becomes `failed`.
    Abandon { retry_count: u32 },
}

/// Fixed retry budget with optional exponential spacing.
///
/// With a zero `backoff_base` a retried entry is eligible again on the very
/// next trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts after which an entry is abandoned
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Enable exponential spacing between an entry's own retries.
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Delay before the retry that follows failure number `retry_count`.
    ///
    /// `base * 2^(retry_count - 1)`, capped at `backoff_max`.
    #[must_use]
    pub fn backoff_delay(&self, retry_count: u32) -> Option<Duration> {
        if self.backoff_base.is_zero() {
            return None;
        }
        let exponent = retry_count.saturating_sub(1).min(20);
        let delay = self.backoff_base.saturating_mul(1 << exponent);
        Some(delay.min(self.backoff_max))
    }

    /// Decide the fate of an entry that had `retry_count` failures before
    /// the attempt that just failed.
    #[must_use]
    pub fn decide(&self, retry_count: u32, now_ms: i64) -> RetryDecision {
        let retry_count = retry_count.saturating_add(1);

        if retry_count >= self.max_retries {
            return RetryDecision::Abandon { retry_count };
        }

        let next_retry_at = self.backoff_delay(retry_count).map(|delay| {
            let millis = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
            now_ms.saturating_add(millis)
        });
        RetryDecision::Retry {
            retry_count,
            next_retry_at,
        }
    }

    /// The single store write that records this failure.
    #[must_use]
    pub fn failure_update(
        &self,
        entry: &QueueEntry,
        error: &RemoteApplyError,
        now_ms: i64,
    ) -> FailureUpdate {
        let (status, retry_count, next_retry_at) = match self.decide(entry.retry_count, now_ms) {
            RetryDecision::Retry {
                retry_count,
                next_retry_at,
            } => (Status::Pending, retry_count, next_retry_at),
            RetryDecision::Abandon { retry_count } => (Status::Failed, retry_count, None),
        };

        FailureUpdate {
            status,
            expected_retry_count: entry.retry_count,
            retry_count,
            next_retry_at,
            error: error.to_string(),
            attempted_at: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Operation;

    #[test]
    fn test_budget_exhausted_after_max_retries() {
        let policy = RetryPolicy::new(3);

        assert_eq!(
            policy.decide(0, 0),
            RetryDecision::Retry {
                retry_count: 1,
                next_retry_at: None
            }
        );
        assert_eq!(
            policy.decide(1, 0),
            RetryDecision::Retry {
                retry_count: 2,
                next_retry_at: None
            }
        );
        assert_eq!(policy.decide(2, 0), RetryDecision::Abandon { retry_count: 3 });
    }

    #[test]
    fn test_single_attempt_budget() {
        let policy = RetryPolicy::new(1);
        assert_eq!(policy.decide(0, 0), RetryDecision::Abandon { retry_count: 1 });
    }

    #[test]
    fn test_backoff_disabled_by_default() {
        assert_eq!(RetryPolicy::default().backoff_delay(1), None);
    }

    #[test]
    fn test_backoff_delay() {
        let policy = RetryPolicy::new(10)
            .with_backoff(Duration::from_secs(5), Duration::from_secs(300));

        assert_eq!(policy.backoff_delay(1), Some(Duration::from_secs(5)));
        assert_eq!(policy.backoff_delay(2), Some(Duration::from_secs(10)));
        assert_eq!(policy.backoff_delay(6), Some(Duration::from_secs(160)));
        // Capped at 5 minutes
        assert_eq!(policy.backoff_delay(7), Some(Duration::from_secs(300)));
        assert_eq!(policy.backoff_delay(40), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_decide_sets_next_retry_at() {
        let policy = RetryPolicy::new(5)
            .with_backoff(Duration::from_millis(100), Duration::from_secs(1));

        assert_eq!(
            policy.decide(1, 1_000),
            RetryDecision::Retry {
                retry_count: 2,
                next_retry_at: Some(1_200)
            }
        );
    }

    #[test]
    fn test_failure_update() {
        let policy = RetryPolicy::new(3);
        let mut entry = QueueEntry::new("student", Operation::Update, serde_json::json!({}), 1);
        entry.retry_count = 2;

        let update = policy.failure_update(
            &entry,
            &RemoteApplyError::Other("boom".to_string()),
            77,
        );

        assert_eq!(update.status, Status::Failed);
        assert_eq!(update.expected_retry_count, 2);
        assert_eq!(update.retry_count, 3);
        assert_eq!(update.error, "boom");
        assert_eq!(update.attempted_at, 77);
        assert!(update.next_retry_at.is_none());
    }
}
