//! Bounded retry with exponential backoff.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Wait applied once after an explicit throttling response.
    #[serde(with = "humantime_serde")]
    pub rate_limit_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let limits = &crate::constants::API_CONFIG.request_limits;
        Self {
            max_attempts: limits.max_retries,
            initial_delay: limits.initial_backoff,
            max_delay: limits.max_backoff,
            rate_limit_cooldown: limits.rate_limit_cooldown,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }

    /// Backoff after the given (1-based) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// What a retry loop ended with, and how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
    pub retries: u32,
    pub rate_limited: u32,
}

/// Runs `f` until it succeeds, fails permanently, or the policy is spent.
///
/// Retryable errors back off exponentially up to `max_attempts`. A
/// `RateLimited` error waits out the cooldown and earns exactly one extra
/// attempt beyond that budget; a second throttle gives up.
pub async fn execute<F, Fut, T>(policy: &RetryPolicy, context: &str, mut f: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    let mut retries = 0;
    let mut rate_limited = 0;
    let mut budget = policy.max_attempts.max(1);

    loop {
        attempts += 1;
        let err = match f().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                    retries,
                    rate_limited,
                }
            }
            Err(err) => err,
        };

        let delay = match &err {
            PipelineError::RateLimited { .. } if rate_limited == 0 => {
                rate_limited += 1;
                budget = budget.max(attempts + 1);
                err.retry_after().unwrap_or(policy.rate_limit_cooldown)
            }
            PipelineError::RateLimited { .. } => {
                rate_limited += 1;
                warn!("{}: throttled again after cooldown, giving up", context);
                return RetryOutcome {
                    result: Err(err),
                    attempts,
                    retries,
                    rate_limited,
                };
            }
            e if e.is_retryable() && attempts < budget => policy.delay_for_attempt(attempts),
            _ => {
                return RetryOutcome {
                    result: Err(err),
                    attempts,
                    retries,
                    rate_limited,
                }
            }
        };

        retries += 1;
        debug!(
            "{}: attempt {} failed ({}), retrying in {:?}",
            context, attempts, err, delay
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_attempts(3)
            .with_delay(Duration::from_millis(1))
            .with_cooldown(Duration::from_millis(1))
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            rate_limit_cooldown: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome = execute(&fast_policy(), "test", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PipelineError::transient("reset", "test"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), 7);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.retries, 2);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let outcome: RetryOutcome<()> = execute(&fast_policy(), "test", || async {
            Err(PipelineError::transient("refused", "test"))
        })
        .await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let outcome: RetryOutcome<()> = execute(&fast_policy(), "test", || async {
            Err(PipelineError::Server {
                message: "not found".into(),
                status: 404,
                body: None,
            })
        })
        .await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_gets_one_retry_after_cooldown() {
        let policy = fast_policy().with_attempts(1);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let outcome = execute(&policy, "test", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(PipelineError::rate_limited(Duration::from_millis(1)))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(outcome.result.unwrap(), "ok");
        assert_eq!(outcome.rate_limited, 1);

        let outcome: RetryOutcome<()> = execute(&policy, "test", || async {
            Err(PipelineError::rate_limited(Duration::from_millis(1)))
        })
        .await;
        assert!(matches!(
            outcome.result,
            Err(PipelineError::RateLimited { .. })
        ));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.rate_limited, 2);
    }
}
