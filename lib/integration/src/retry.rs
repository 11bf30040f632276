//! Retry with exponential backoff for retryable connector errors.
//!
//! Only rate limiting and deadline expiry are retried; all other errors
//! are terminal for the call. The attempt count is a configurable bound,
//! never unbounded.

use crate::error::ConnectorError;
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given attempt bound and default delays.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Returns the delay before the retry following `attempt` (1-based).
    ///
    /// When the provider supplied a retry-after hint, the delay honors it
    /// if it is longer than the computed backoff.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &ConnectorError) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay);

        if let ConnectorError::RateLimited {
            retry_after_secs: Some(secs),
        } = error
        {
            backoff.max(Duration::from_secs(*secs))
        } else {
            backoff
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Runs an operation, retrying retryable failures per the policy.
///
/// # Errors
///
/// Returns the last error once the attempt bound is reached, or the first
/// non-retryable error immediately.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ConnectorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConnectorError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt, &err);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after backoff");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(450),
        };
        let err = ConnectorError::Timeout;

        assert_eq!(policy.delay_for(1, &err), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, &err), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, &err), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4, &err), Duration::from_millis(450));
        assert_eq!(policy.delay_for(9, &err), Duration::from_millis(450));
    }

    #[test]
    fn delay_honors_retry_after_hint() {
        let policy = RetryPolicy::default();
        let err = ConnectorError::RateLimited {
            retry_after_secs: Some(60),
        };
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limited_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::new(4), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ConnectorError::RateLimited {
                        retry_after_secs: None,
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_bound_is_enforced() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::new(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ConnectorError::Timeout) }
        })
        .await;

        assert_eq!(result, Err(ConnectorError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::new(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ConnectorError::auth("revoked")) }
        })
        .await;

        assert_eq!(result, Err(ConnectorError::auth("revoked")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
