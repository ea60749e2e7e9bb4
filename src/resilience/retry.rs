use super::attempt::AttemptResult;
use crate::Error;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts are `max_retries + 1`
    pub max_retries: u32,
    /// Base of the exponential backoff, in seconds: retry `k` waits `base^k`.
    /// Delays only grow when the base is above one second.
    pub backoff_base: Duration,
    /// Maximum delay between retries
    pub max_backoff: Duration,
    /// Maximum jitter as a fraction of the delay
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Re-issues failed attempts with exponential backoff.
///
/// Successes and fatal failures end the loop immediately. Transient
/// failures and timeouts are retried until attempts run out, and the last
/// of them is returned. Backoff waits are timers, so other requests keep
/// making progress while one is waiting.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    operation_name: String,
    config: RetryConfig,
}

impl RetryScheduler {
    pub fn new(operation_name: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            operation_name: operation_name.into(),
            config,
        }
    }

    /// Run `operation` (called with the 1-based attempt number) until it settles
    pub async fn run<T, F, Fut>(&self, mut operation: F, cancel: &CancellationToken) -> AttemptResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AttemptResult<T>>,
    {
        let max_attempts = self.config.max_attempts();
        let mut last_retryable: Option<AttemptResult<T>> = None;
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return cancelled(last_retryable);
            }

            debug!(
                "Executing operation '{}' (attempt {}/{})",
                self.operation_name, attempt, max_attempts
            );

            let outcome = operation(attempt).await;

            if !outcome.is_retryable() {
                if outcome.is_cancelled() {
                    return cancelled(last_retryable);
                }
                if attempt > 1 && outcome.is_success() {
                    debug!(
                        "Operation '{}' succeeded after {} attempts",
                        self.operation_name, attempt
                    );
                }
                return outcome;
            }

            if attempt >= max_attempts {
                warn!(
                    "Operation '{}' failed after {} attempts: {}",
                    self.operation_name,
                    attempt,
                    describe(&outcome)
                );
                return outcome;
            }

            let delay = self.backoff_delay(attempt);
            debug!(
                "Operation '{}' failed (attempt {}), retrying after {:?}: {}",
                self.operation_name,
                attempt,
                delay,
                describe(&outcome)
            );
            last_retryable = Some(outcome);

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("Operation '{}' cancelled during backoff", self.operation_name);
                    return cancelled(last_retryable);
                }
                () = sleep(delay) => {}
            }

            attempt += 1;
        }
    }

    /// Delay before retry `retry` (1-based): `backoff_base^retry`, capped and jittered
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let seconds = self.config.backoff_base.as_secs_f64().powi(exponent);
        let delay = Duration::try_from_secs_f64(seconds)
            .unwrap_or(self.config.max_backoff)
            .min(self.config.max_backoff);

        add_jitter(delay, self.config.jitter)
    }
}

/// A cancelled request reports the last transient outcome if one was seen
fn cancelled<T>(last_retryable: Option<AttemptResult<T>>) -> AttemptResult<T> {
    last_retryable.unwrap_or(AttemptResult::FatalFailure(Error::Cancelled))
}

fn describe<T>(outcome: &AttemptResult<T>) -> String {
    match outcome {
        AttemptResult::Success(_) => "success".to_string(),
        AttemptResult::TransientFailure(error) | AttemptResult::FatalFailure(error) => {
            error.to_string()
        }
        AttemptResult::Timeout(timeout) => format!("timed out after {timeout:?}"),
    }
}

/// Add jitter to delay
fn add_jitter(delay: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return delay;
    }

    use rand::Rng;
    let mut rng = rand::thread_rng();
    let jitter_ms = (delay.as_millis() as f64 * jitter_factor) as u64;
    let jitter = rng.gen_range(0..=jitter_ms);

    delay + Duration::from_millis(jitter)
}
