use tokio::time::{sleep, Duration, Instant};
use tracing::{error, info, warn};

use super::retry::exponential_backoff;
use super::{emit, Progress, ProgressCallback};
use crate::error::{
    classify_poll_exhaustion, classify_service_error, ClassifiedError, ErrorKind, IsRetryable,
    POLL_FALLBACK_MESSAGE,
};
use crate::settings::PollPolicy;
use crate::veo::types::Operation;
use crate::veo::VeoClient;

/// Interval and consecutive-failure bookkeeping for one polling run.
///
/// A successful query resets both to base values; each retryable failure
/// grows the next interval to `base * 2^failures + jitter`.
#[derive(Debug, Clone)]
pub struct PollState {
    policy: PollPolicy,
    interval: Duration,
    failures: u32,
}

impl PollState {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            interval: policy.interval(),
            failures: 0,
        }
    }

    /// How long to wait before the next status query.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.interval = self.policy.interval();
    }

    /// Returns the grown interval, or `None` once the failure bound is exceeded.
    pub fn record_retryable_failure(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures > self.policy.max_failures {
            return None;
        }
        self.interval = exponential_backoff(self.policy.interval(), self.failures, self.policy.jitter_ms);
        Some(self.interval)
    }
}

/// Query the operation until it reports `done`, replacing the local snapshot
/// with each successful response.
///
/// The time budget covers waiting on a responsive service only. Backoff after
/// retryable failures is bounded by `max_failures` instead, so a run of
/// failures always ends with the exhaustion classification.
pub async fn poll_until_done(
    client: &VeoClient,
    mut operation: Operation,
    policy: &PollPolicy,
    on_progress: Option<&ProgressCallback>,
) -> Result<Operation, ClassifiedError> {
    let name = operation.name.clone();
    let mut state = PollState::new(*policy);
    let started = Instant::now();
    let mut backing_off = Duration::ZERO;
    let mut checks = 0u32;

    while !operation.done {
        let mut delay = state.interval();
        if state.failures() > 0 {
            backing_off += delay;
        } else if let Some(budget) = policy.timeout() {
            let spent = started.elapsed().saturating_sub(backing_off);
            let remaining = budget.saturating_sub(spent);
            if remaining.is_zero() {
                error!(operation = %name, budget_ms = budget.as_millis() as u64, "polling timed out");
                return Err(ClassifiedError::new(
                    ErrorKind::Unknown,
                    format!("Video generation timed out after {budget:?}."),
                ));
            }
            delay = delay.min(remaining);
        }

        sleep(delay).await;
        checks += 1;

        match client.get_operation(&name).await {
            Ok(latest) => {
                operation = latest;
                state.record_success();
                info!(operation = %name, checks, done = operation.done, "polling video operation...");
                emit(on_progress, Progress::Polling { checks, done: operation.done });
            }
            Err(err) if err.is_retryable() => match state.record_retryable_failure() {
                Some(delay) => {
                    warn!(
                        operation = %name,
                        failures = state.failures(),
                        max_failures = policy.max_failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "poll failed, backing off"
                    );
                    emit(
                        on_progress,
                        Progress::Backoff {
                            failures: state.failures(),
                            delay,
                        },
                    );
                }
                None => {
                    error!(operation = %name, error = %err, "poll still failing after retries");
                    return Err(classify_poll_exhaustion(&err));
                }
            },
            Err(err) => {
                error!(operation = %name, error = %err, "poll failed");
                return Err(classify_service_error(&err, POLL_FALLBACK_MESSAGE));
            }
        }
    }

    Ok(operation)
}
