use std::time::Duration;
use thiserror::Error;

/// Error categorization for the dispatch pipeline
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (permanent failures)
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Config serialization error: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    // Network errors (transient - should retry)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Connection refused: {endpoint}")]
    ConnectionRefused { endpoint: String },

    #[error("Transport error: {0}")]
    Transport(String),

    // Downstream answered with a server-fault status
    #[error("Downstream returned server fault status {status}")]
    ServerFault { status: u16 },

    // Client errors (permanent - don't retry)
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Downstream rejected request: {0}")]
    Rejected(String),

    // Circuit breaker errors
    #[error("Circuit breaker open for service: {service}")]
    CircuitBreakerOpen { service: String },

    #[error("Timeout error: operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Request cancelled by caller")]
    Cancelled,
}

/// Error categorization for retry and breaker decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Permanent errors - should not retry
    Permanent,
    /// Transient errors - safe to retry, count toward breaking
    Transient,
    /// Circuit breaker rejected the call
    CircuitBreaker,
    /// The caller gave up on the request
    Cancelled,
}

impl Error {
    /// Categorize error for retry logic
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_)
            | Self::ConfigRender(_)
            | Self::InvalidInput { .. }
            | Self::Rejected(_) => ErrorCategory::Permanent,

            Self::CircuitBreakerOpen { .. } => ErrorCategory::CircuitBreaker,

            Self::Cancelled => ErrorCategory::Cancelled,

            // Builder and URL errors never get better on retry
            Self::Http(e) if e.is_builder() || e.is_redirect() => ErrorCategory::Permanent,

            Self::Http(_)
            | Self::ConnectionRefused { .. }
            | Self::Transport(_)
            | Self::ServerFault { .. }
            | Self::Timeout { .. } => ErrorCategory::Transient,
        }
    }

    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

pub type Result<T> = std::result::Result<T, Error>;
