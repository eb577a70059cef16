use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use marquee_core::CoreResult;
use marquee_store::app_config::LockingRules;

/// Exponential backoff for units of work the store aborted without effect
/// (serialization failure, deadlock, unique-key race).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_rules(rules: &LockingRules) -> Self {
        Self {
            max_retries: rules.max_retries,
            initial_delay: Duration::from_millis(rules.retry_backoff_millis),
            max_delay: Duration::from_millis(rules.max_backoff_millis),
            ..Self::default()
        }
    }

    /// initial_delay * multiplier ^ attempt, capped at max_delay
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(self.max_delay)
    }

    /// Runs `unit` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. The last error is returned in the latter cases.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut unit: F) -> CoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let mut attempt = 0;

        loop {
            match unit().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!("{} succeeded after {} retries", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!("{} attempt {} aborted: {}. Retrying in {:?}", operation, attempt + 1, e, delay);
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        error!("{} gave up after {} retries: {}", operation, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::{CoreError, StoreError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(40));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(50));
    }

    #[test]
    fn test_policy_from_rules() {
        let rules = LockingRules::default();
        let policy = RetryPolicy::from_rules(&rules);
        assert_eq!(policy.max_retries, rules.max_retries);
        assert_eq!(policy.max_delay, Duration::from_millis(rules.max_backoff_millis));
    }

    #[tokio::test]
    async fn test_retryable_error_is_retried() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = fast_policy(3)
            .run("test", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CoreError::Store(StoreError::Deadlock("40P01".into())))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_bound() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: CoreResult<()> = fast_policy(2)
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::Store(StoreError::Serialization("40001".into())))
            })
            .await;

        assert!(matches!(result, Err(CoreError::Store(StoreError::Serialization(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_fast() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: CoreResult<()> = fast_policy(3)
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::Store(StoreError::LockTimeout("A1".into())))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
