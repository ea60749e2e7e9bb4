//! Circuit breaker shared by every request of one dispatcher.
//!
//! ```text
//! Closed   --failure_threshold consecutive failures--> Open
//! Open     --break_duration elapsed, next call-------> HalfOpen (one trial)
//! HalfOpen --trial succeeds--------------------------> Closed
//! HalfOpen --trial fails-----------------------------> Open (fresh expiry)
//! ```
//!
//! State, failure counter, expiry and the trial slot live in one record
//! behind one lock, so concurrent callers never observe a half-applied
//! transition. The lock is never held across an await point.

use super::attempt::AttemptResult;
use super::observer::{BreakerObserver, TracingObserver};
use crate::Error;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally
    Closed,
    /// Circuit is open - requests are rejected until `until`
    Open { until: Instant },
    /// Circuit is half-open - a single trial call decides what happens next
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time to wait before a trial call is allowed
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            break_duration: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    failure_count: u32,
    trial_in_flight: bool,
    total_calls: u64,
    rejected_calls: u64,
}

impl Default for BreakerCore {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            trial_in_flight: false,
            total_calls: 0,
            rejected_calls: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

enum Transition {
    Opened,
    Reopened,
    Closed,
}

/// Admission ticket for one guarded call.
///
/// A trial whose future is dropped before completing frees the slot so the
/// breaker cannot get stuck half-open.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            self.breaker.core.lock().trial_in_flight = false;
            debug!(
                "Circuit breaker '{}': trial abandoned, slot released",
                self.breaker.name
            );
        }
    }
}

/// Circuit breaker implementation
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    core: Mutex<BreakerCore>,
    observer: Arc<dyn BreakerObserver>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker reporting transitions through `tracing`
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_observer(name, config, Arc::new(TracingObserver))
    }

    /// Create a new circuit breaker with a custom transition observer
    pub fn with_observer(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        observer: Arc<dyn BreakerObserver>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            core: Mutex::new(BreakerCore::default()),
            observer,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `operation` under breaker protection.
    ///
    /// Rejected calls return `FatalFailure(CircuitBreakerOpen)` without
    /// invoking `operation`. Only transient failures and timeouts count
    /// toward opening the circuit.
    pub async fn guard<T, F, Fut>(&self, operation: F) -> AttemptResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AttemptResult<T>>,
    {
        let Some(admission) = self.admit() else {
            debug!("Circuit breaker '{}': call rejected", self.name);
            return AttemptResult::FatalFailure(Error::CircuitBreakerOpen {
                service: self.name.clone(),
            });
        };

        let mut permit = Permit {
            breaker: self,
            admission,
            settled: false,
        };

        let start_time = Instant::now();
        let outcome = operation().await;
        debug!(
            "Circuit breaker '{}': {:?} call finished after {:?}",
            self.name,
            admission,
            start_time.elapsed()
        );

        self.record(&mut permit, &outcome);
        outcome
    }

    /// Decide whether a call may proceed, claiming the trial slot if needed
    fn admit(&self) -> Option<Admission> {
        let mut entered_half_open = false;

        let admission = {
            let mut core = self.core.lock();
            core.total_calls += 1;

            match core.state {
                CircuitState::Closed => Some(Admission::Normal),
                CircuitState::Open { until } if Instant::now() >= until => {
                    core.state = CircuitState::HalfOpen;
                    core.trial_in_flight = true;
                    entered_half_open = true;
                    Some(Admission::Trial)
                }
                CircuitState::HalfOpen if !core.trial_in_flight => {
                    core.trial_in_flight = true;
                    Some(Admission::Trial)
                }
                CircuitState::Open { .. } | CircuitState::HalfOpen => {
                    core.rejected_calls += 1;
                    None
                }
            }
        };

        if entered_half_open {
            self.observer.on_half_open(&self.name);
        }

        admission
    }

    /// Apply the outcome of an admitted call
    fn record<T>(&self, permit: &mut Permit<'_>, outcome: &AttemptResult<T>) {
        permit.settled = true;

        let transition = {
            let mut core = self.core.lock();

            match permit.admission {
                Admission::Trial => {
                    core.trial_in_flight = false;
                    if outcome.is_success() {
                        core.state = CircuitState::Closed;
                        core.failure_count = 0;
                        Some(Transition::Closed)
                    } else if outcome.counts_toward_break() {
                        core.state = CircuitState::Open {
                            until: Instant::now() + self.config.break_duration,
                        };
                        core.failure_count = 0;
                        Some(Transition::Reopened)
                    } else {
                        None
                    }
                }
                Admission::Normal => {
                    if outcome.is_success() {
                        core.failure_count = 0;
                        None
                    } else if outcome.counts_toward_break()
                        && core.state == CircuitState::Closed
                    {
                        core.failure_count += 1;
                        if core.failure_count >= self.config.failure_threshold {
                            core.state = CircuitState::Open {
                                until: Instant::now() + self.config.break_duration,
                            };
                            core.failure_count = 0;
                            Some(Transition::Opened)
                        } else {
                            None
                        }
                    } else {
                        // Fatal outcomes, or a failure that raced with another
                        // caller's transition out of Closed.
                        None
                    }
                }
            }
        };

        match transition {
            Some(Transition::Opened | Transition::Reopened) => {
                let timeout_cause;
                let cause = match outcome {
                    AttemptResult::TransientFailure(error) => error,
                    AttemptResult::Timeout(timeout) => {
                        timeout_cause = Error::Timeout { timeout: *timeout };
                        &timeout_cause
                    }
                    AttemptResult::Success(_) | AttemptResult::FatalFailure(_) => return,
                };
                self.observer
                    .on_break(&self.name, cause, self.config.break_duration);
            }
            Some(Transition::Closed) => self.observer.on_reset(&self.name),
            None => {}
        }
    }

    /// Current circuit state.
    ///
    /// An expired break is still reported as `Open` until the next call
    /// claims the trial slot.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    /// Consecutive failures counted while closed
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.core.lock().failure_count
    }

    /// Snapshot of breaker state and counters
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let core = self.core.lock();

        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: core.state,
            failure_count: core.failure_count,
            total_calls: core.total_calls,
            rejected_calls: core.rejected_calls,
        }
    }
}

/// Public metrics for circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
}

impl CircuitBreakerMetrics {
    /// Check if circuit breaker is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self.state, CircuitState::Closed)
    }

    /// Share of calls shed by the breaker, as a percentage
    #[must_use]
    pub fn rejection_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            (self.rejected_calls as f64 / self.total_calls as f64) * 100.0
        }
    }
}
