//! In-call retries for transient GitHub failures.
//!
//! A fetch or compare that hits a 5xx, a network error or a timeout is tried
//! again a couple of times with doubling delays. If it still fails the poller
//! leaves the PR alone until the next cycle. Rate limits and permanent
//! failures go straight back to the caller.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::error::GitHubApiError;

/// How often, and how patiently, a transient failure is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransientRetry {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry; doubled for each later one.
    pub first_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl TransientRetry {
    /// Two retries, after 1s and 2s.
    pub const DEFAULT: Self = Self {
        max_retries: 2,
        first_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(8),
    };

    /// Every call is made exactly once.
    pub const DISABLED: Self = Self {
        max_retries: 0,
        first_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };

    /// Delay before retry number `retry` (0-based).
    pub fn delay_before(&self, retry: u32) -> Duration {
        self.first_delay
            .saturating_mul(1u32 << retry.min(31))
            .min(self.max_delay)
    }
}

impl Default for TransientRetry {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Runs `call` until it succeeds, fails with anything other than a transient
/// error, or runs out of retries. The last error is returned as is.
pub async fn with_transient_retry<T, F, Fut>(
    retry: TransientRetry,
    context: &str,
    mut call: F,
) -> Result<T, GitHubApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GitHubApiError>>,
{
    let mut retries = 0;
    loop {
        match call().await {
            Err(e) if e.kind.is_retriable() && retries < retry.max_retries => {
                let delay = retry.delay_before(retries);
                retries += 1;
                debug!(
                    context,
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying transient GitHub error"
                );
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::github::GitHubErrorKind;

    const QUICK: TransientRetry = TransientRetry {
        max_retries: 2,
        first_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    };

    /// Calls `with_transient_retry` with a scripted sequence of results and
    /// returns the outcome plus the number of calls made.
    async fn run_script(
        retry: TransientRetry,
        script: Vec<Result<u32, GitHubApiError>>,
    ) -> (Result<u32, GitHubApiError>, u32) {
        let calls = AtomicU32::new(0);
        let script = std::sync::Mutex::new(script.into_iter());
        let result = with_transient_retry(retry, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            let next = script.lock().unwrap().next().expect("script exhausted");
            async move { next }
        })
        .await;
        (result, calls.load(Ordering::SeqCst))
    }

    fn bad_gateway() -> GitHubApiError {
        GitHubApiError::transient_without_source("bad gateway")
    }

    #[test]
    fn default_waits_one_then_two_seconds() {
        let retry = TransientRetry::DEFAULT;
        assert_eq!(retry.delay_before(0), Duration::from_secs(1));
        assert_eq!(retry.delay_before(1), Duration::from_secs(2));
    }

    #[test]
    fn delays_stop_at_the_cap() {
        let retry = TransientRetry {
            max_retries: 10,
            ..TransientRetry::DEFAULT
        };
        assert_eq!(retry.delay_before(3), Duration::from_secs(8));
        assert_eq!(retry.delay_before(40), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn transient_failure_recovers_within_budget() {
        let (result, calls) = run_script(QUICK, vec![Err(bad_gateway()), Err(bad_gateway()), Ok(7)]).await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn persistent_transient_failure_returns_last_error() {
        let (result, calls) = run_script(
            QUICK,
            vec![
                Err(bad_gateway()),
                Err(bad_gateway()),
                Err(GitHubApiError::transient_without_source("still down")),
            ],
        )
        .await;

        assert_eq!(result.unwrap_err().message, "still down");
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn rate_limit_returns_at_once() {
        let reset_at = Utc::now();
        let (result, calls) = run_script(QUICK, vec![Err(GitHubApiError::rate_limited(reset_at))]).await;

        assert_eq!(result.unwrap_err().rate_limit_reset(), Some(reset_at));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn permanent_failure_returns_at_once() {
        let (result, calls) = run_script(
            QUICK,
            vec![Err(GitHubApiError::permanent_without_source("not found"))],
        )
        .await;

        assert_eq!(result.unwrap_err().kind, GitHubErrorKind::Permanent);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn disabled_makes_a_single_call() {
        let (result, calls) = run_script(TransientRetry::DISABLED, vec![Err(bad_gateway())]).await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    proptest! {
        #[test]
        fn delays_never_shrink_or_exceed_cap(
            first_ms in 1u64..2000,
            max_ms in 2000u64..60000,
            retries in 1u32..40,
        ) {
            let retry = TransientRetry {
                max_retries: retries,
                first_delay: Duration::from_millis(first_ms),
                max_delay: Duration::from_millis(max_ms),
            };

            let delays: Vec<_> = (0..retries).map(|n| retry.delay_before(n)).collect();
            prop_assert_eq!(delays[0], Duration::from_millis(first_ms));
            for pair in delays.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
            prop_assert!(delays.iter().all(|d| *d <= Duration::from_millis(max_ms)));
        }
    }
}
