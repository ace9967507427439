//! Caller-side retry above the fetch cache.
//!
//! The cache itself never retries. A caller that would rather wait than show
//! "unavailable" wraps its lookup in [`retry_unavailable`], which re-runs the
//! whole lookup (cache tiers included) while it keeps coming back
//! [`FetchResult::Unavailable`].

use std::future::Future;
use std::time::Duration;

use crate::cache::FetchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles after each failure.
    pub base_backoff: Duration,
    /// Upper bound on any single wait, including a server's retry-after hint.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that runs the operation once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Wait before attempt `attempt + 1`, given the previous outcome.
    ///
    /// A rate-limit hint wins over exponential backoff; both are capped.
    pub fn delay_for<T>(&self, attempt: u32, previous: &FetchResult<T>) -> Duration {
        let wait = previous.retry_after().unwrap_or_else(|| {
            let exp = attempt.saturating_sub(1).min(16);
            self.base_backoff.saturating_mul(1u32 << exp)
        });
        wait.min(self.max_backoff)
    }
}

/// Run `op` until it returns something other than `Unavailable` or the
/// attempts run out. The last outcome is returned either way.
pub async fn retry_unavailable<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> FetchResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FetchResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = op().await;
        if !result.is_unavailable() || attempt >= attempts {
            return result;
        }
        let wait = policy.delay_for(attempt, &result);
        tracing::info!(
            attempt,
            max_attempts = attempts,
            wait_ms = wait.as_millis() as u64,
            cause = ?result.cause(),
            "lookup unavailable, retrying"
        );
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::FetchError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn rate_limited(secs: u64) -> FetchResult<u32> {
        FetchResult::Unavailable(FetchError::RateLimited {
            retry_after: Duration::from_secs(secs),
        })
    }

    #[test]
    fn delay_prefers_retry_after_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for(1, &rate_limited(4)), Duration::from_secs(4));
        assert_eq!(policy.delay_for(1, &rate_limited(60)), Duration::from_secs(10));

        let failed: FetchResult<u32> = FetchResult::Unavailable(FetchError::Failed("x".into()));
        assert_eq!(policy.delay_for(1, &failed), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3, &failed), Duration::from_secs(4));
        assert_eq!(policy.delay_for(9, &failed), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_value_honoring_hint() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let start = Instant::now();

        let result = retry_unavailable(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    rate_limited(2)
                } else {
                    FetchResult::Fresh(7)
                }
            }
        })
        .await;

        assert_eq!(result, FetchResult::Fresh(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default().with_max_attempts(3);

        let result = retry_unavailable(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { rate_limited(1) }
        })
        .await;

        assert!(result.is_unavailable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result = retry_unavailable(&RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                FetchResult::Degraded {
                    value: 1,
                    cause: FetchError::Failed("down".into()),
                }
            }
        })
        .await;
        assert!(result.is_stale());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn none_runs_once() {
        let calls = AtomicU32::new(0);
        let result = retry_unavailable(&RetryPolicy::none(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { rate_limited(1) }
        })
        .await;
        assert!(result.is_unavailable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
