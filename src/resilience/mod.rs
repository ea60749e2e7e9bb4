pub mod attempt;
pub mod circuit_breaker;
pub mod observer;
pub mod retry;
pub mod timeout;


pub use attempt::AttemptResult;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
pub use observer::{BreakerObserver, NoopObserver, TracingObserver};
pub use retry::{RetryConfig, RetryScheduler};
pub use timeout::TimeoutGuard;
