use crate::Error;
use std::time::Duration;
use tracing::{info, warn};

/// Receives circuit breaker transitions.
///
/// Notifications are advisory: they are delivered after the transition has
/// been committed and their outcome never affects dispatching.
pub trait BreakerObserver: Send + Sync {
    /// The circuit opened because of `cause` and will stay open for `break_duration`
    fn on_break(&self, service: &str, cause: &Error, break_duration: Duration);

    /// A trial call succeeded and the circuit closed again
    fn on_reset(&self, service: &str);

    /// The break expired; the next call is a trial
    fn on_half_open(&self, service: &str);
}

/// Default observer writing structured `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BreakerObserver for TracingObserver {
    fn on_break(&self, service: &str, cause: &Error, break_duration: Duration) {
        warn!(
            service,
            break_ms = break_duration.as_millis() as u64,
            cause = %cause,
            "Breaking the circuit"
        );
    }

    fn on_reset(&self, service: &str) {
        info!(service, "Call ok, circuit closed again");
    }

    fn on_half_open(&self, service: &str) {
        info!(service, "Circuit half-open, next call is a trial");
    }
}

/// Observer that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl BreakerObserver for NoopObserver {
    fn on_break(&self, _service: &str, _cause: &Error, _break_duration: Duration) {}
    fn on_reset(&self, _service: &str) {}
    fn on_half_open(&self, _service: &str) {}
}
