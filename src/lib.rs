//! Resilient request dispatch.
//!
//! [`ResilientDispatcher`] sits between a caller and an unreliable
//! [`Transport`] and applies, outermost first, a circuit breaker, an
//! optional whole-request timeout, retry with exponential backoff and a
//! per-attempt timeout. Callers always get a [`Response`] back: faults are
//! turned into synthesized server-fault responses.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod resilience;

pub use config::{Config, ConfigOverrides, DispatcherConfig, TransportConfig};
pub use dispatch::{
    FailureKind, HttpTransport, Request, ResilientDispatcher, Response, Transport,
};
pub use error::{Error, ErrorCategory, Result};
pub use resilience::{
    AttemptResult, BreakerObserver, CircuitBreaker, CircuitBreakerConfig, CircuitState,
    RetryConfig, RetryScheduler, TimeoutGuard, TracingObserver,
};
