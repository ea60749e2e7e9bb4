use crate::Error;
use std::time::Duration;

/// Classified outcome of one attempt (or of a whole policy chain)
#[derive(Debug)]
pub enum AttemptResult<T> {
    /// The operation produced a value
    Success(T),
    /// Retryable failure that counts toward opening the circuit
    TransientFailure(Error),
    /// The attempt exceeded its deadline
    Timeout(Duration),
    /// Not retried and never counted by the breaker
    FatalFailure(Error),
}

impl<T> AttemptResult<T> {
    /// Classify a plain error by its category
    #[must_use]
    pub fn from_error(error: Error) -> Self {
        match error {
            Error::Timeout { timeout } => Self::Timeout(timeout),
            error if error.is_retryable() => Self::TransientFailure(error),
            error => Self::FatalFailure(error),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Transient failures and timeouts are worth another attempt
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientFailure(_) | Self::Timeout(_))
    }

    /// Whether the breaker should count this outcome as a failure
    #[must_use]
    pub const fn counts_toward_break(&self) -> bool {
        self.is_retryable()
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::FatalFailure(Error::Cancelled))
    }
}
