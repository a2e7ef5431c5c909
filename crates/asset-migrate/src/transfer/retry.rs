//! Bounded retry of transient transfer failures.

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use super::{AssetTransfer, TransferOutcome};

/// Exponential backoff for transient errors within one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after failed try number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Wraps an adapter and retries transient errors per [`RetryPolicy`].
///
/// Success, already-exists and permanent errors are returned as soon as
/// they happen.
#[derive(Debug, Clone)]
pub struct RetryingTransfer<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> RetryingTransfer<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[async_trait]
impl<T: AssetTransfer> AssetTransfer for RetryingTransfer<T> {
    async fn transfer(&self, path: &str) -> TransferOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = self.inner.transfer(path).await;
            if !outcome.is_transient_error() || attempt >= max_attempts {
                return outcome;
            }

            let delay = self.policy.delay_for(attempt);
            if let TransferOutcome::Error(e) = &outcome {
                warn!(
                    "Transient error for {}, retry {}/{} in {:?}: {}",
                    path,
                    attempt,
                    max_attempts - 1,
                    delay,
                    e.message
                );
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Plays back a fixed sequence of outcomes.
    struct Scripted {
        outcomes: Mutex<VecDeque<TransferOutcome>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(outcomes: Vec<TransferOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl AssetTransfer for Scripted {
        async fn transfer(&self, _path: &str) -> TransferOutcome {
            *self.calls.lock().unwrap() += 1;
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(TransferOutcome::Success { size_bytes: 0 })
        }
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let inner = Scripted::new(vec![
            TransferOutcome::Error(TransferError::transient("429")),
            TransferOutcome::Success { size_bytes: 42 },
        ]);
        let retrying = RetryingTransfer::new(inner, fast(3));
        assert_eq!(
            retrying.transfer("p").await,
            TransferOutcome::Success { size_bytes: 42 }
        );
        assert_eq!(retrying.inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let inner = Scripted::new(vec![
            TransferOutcome::Error(TransferError::transient("timeout 1")),
            TransferOutcome::Error(TransferError::transient("timeout 2")),
            TransferOutcome::Error(TransferError::transient("timeout 3")),
            TransferOutcome::Success { size_bytes: 1 },
        ]);
        let retrying = RetryingTransfer::new(inner, fast(3));
        assert_eq!(
            retrying.transfer("p").await,
            TransferOutcome::Error(TransferError::transient("timeout 3"))
        );
        assert_eq!(retrying.inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_is_not_retried() {
        let inner = Scripted::new(vec![TransferOutcome::Error(TransferError::permanent(
            "access denied",
        ))]);
        let retrying = RetryingTransfer::new(inner, fast(5));
        assert!(matches!(
            retrying.transfer("p").await,
            TransferOutcome::Error(e) if !e.is_transient()
        ));
        assert_eq!(retrying.inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_already_exists_is_not_retried() {
        let inner = Scripted::new(vec![TransferOutcome::AlreadyExists]);
        let retrying = RetryingTransfer::new(inner, fast(5));
        assert_eq!(retrying.transfer("p").await, TransferOutcome::AlreadyExists);
        assert_eq!(retrying.inner.calls(), 1);
    }
}
