use backon::{BackoffBuilder, Retryable};
use rand::Rng as _;
use std::fmt::Display;
use std::future::Future;
use tokio::time::Duration;
use tracing::warn;

use crate::settings::RetryPolicy;

/// `base * 2^exponent + uniform(0..=jitter_ms)`, saturating.
pub fn exponential_backoff(base: Duration, exponent: u32, jitter_ms: u64) -> Duration {
    let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
    base.saturating_mul(factor).saturating_add(jitter(jitter_ms))
}

fn jitter(max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

/// Backoff schedule for submission: `base * 2^(n-1) + jitter` before attempt
/// `n + 1`, with flat jitter rather than a share of the delay.
#[derive(Debug, Clone, Copy)]
pub struct SubmitBackoff {
    policy: RetryPolicy,
}

impl SubmitBackoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl BackoffBuilder for SubmitBackoff {
    type Backoff = SubmitDelays;

    fn build(self) -> Self::Backoff {
        SubmitDelays {
            policy: self.policy,
            retries: 0,
        }
    }
}

#[derive(Debug)]
pub struct SubmitDelays {
    policy: RetryPolicy,
    retries: u32,
}

impl Iterator for SubmitDelays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.retries + 1 >= self.policy.max_attempts.max(1) {
            return None;
        }
        let delay = exponential_backoff(self.policy.base_delay(), self.retries, self.policy.jitter_ms);
        self.retries += 1;
        Some(delay)
    }
}

/// Run `call` until it succeeds, `should_retry` rejects its error, or the
/// policy's attempt budget is spent. The error that ended the run is returned
/// unchanged; callers classify it.
pub async fn with_backoff<T, E, F, Fut, P>(
    label: &str,
    policy: &RetryPolicy,
    call: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut retries = 0u32;

    let result = call
        .retry(SubmitBackoff::new(*policy))
        .when(|e: &E| should_retry(e))
        .notify(|e: &E, delay: Duration| {
            retries += 1;
            warn!(
                label,
                attempt = retries,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "retryable failure, backing off"
            );
        })
        .await;

    if let Err(e) = &result {
        warn!(label, error = %e, "giving up");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum Fake {
        Busy,
        Fatal,
    }

    impl Display for Fake {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 4_000,
            jitter_ms: 0,
        }
    }

    /// Fails with `Busy` for the first `failures` calls, then succeeds.
    async fn run(max_attempts: u32, failures: u32, calls: &AtomicU32) -> Result<u32, Fake> {
        with_backoff(
            "test",
            &policy(max_attempts),
            move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    Err(Fake::Busy)
                } else {
                    Ok(n)
                }
            },
            |e| *e == Fake::Busy,
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_when_failures_fit_in_budget() {
        for failures in 0..6 {
            let calls = AtomicU32::new(0);
            assert_eq!(run(6, failures, &calls).await, Ok(failures + 1));
            assert_eq!(calls.load(Ordering::SeqCst), failures + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_exactly_max_attempts() {
        for failures in [6, 7, 50] {
            let calls = AtomicU32::new(0);
            assert_eq!(run(6, failures, &calls).await, Err(Fake::Busy));
            assert_eq!(calls.load(Ordering::SeqCst), 6);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_short_circuits() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = Instant::now();
        let result: Result<(), Fake> = with_backoff(
            "test",
            &policy(6),
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Fake::Fatal)
            },
            |e| *e == Fake::Busy,
        )
        .await;
        assert_eq!(result, Err(Fake::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_double_between_attempts() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        run(6, 3, &calls).await.unwrap();
        // 4s + 8s + 16s before attempts 2, 3, 4
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(28), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(29), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn success_returns_without_delay() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        run(6, 0, &calls).await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn backoff_is_monotonic_and_bounded_below() {
        let base = Duration::from_secs(10);
        let mut previous = Duration::ZERO;
        for k in 0..12 {
            let d = exponential_backoff(base, k, 1_000);
            assert!(d >= base * 2u32.pow(k));
            assert!(d <= base * 2u32.pow(k) + Duration::from_millis(1_000));
            assert!(d >= previous);
            previous = d;
        }
    }

    #[test]
    fn submit_schedule_allows_max_attempts_minus_one_retries() {
        let delays: Vec<Duration> = SubmitBackoff::new(policy(6)).build().collect();
        assert_eq!(
            delays,
            [4, 8, 16, 32, 64].map(Duration::from_secs).to_vec()
        );
        assert_eq!(SubmitBackoff::new(policy(1)).build().count(), 0);
    }

    #[test]
    fn backoff_does_not_overflow() {
        let base = Duration::from_secs(10);
        assert_eq!(exponential_backoff(base, 64, 0), base.saturating_mul(u32::MAX));
        assert_eq!(exponential_backoff(Duration::MAX, 3, 1_000), Duration::MAX);
    }
}
