//! # Configuration
//!
//! Layered configuration for the dispatcher: built-in defaults, an optional
//! TOML file, `DISPATCH__*` environment variables and finally command-line
//! overrides. The result is validated once and then handed to the dispatch
//! core as plain values; nothing is re-read at runtime.

use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Prefix for environment variable overrides, e.g. `DISPATCH__DISPATCHER__MAX_RETRIES=5`
pub const ENV_PREFIX: &str = "DISPATCH";

/// Exclusive lower bound for `backoff_base_ms`: retry `k` waits `base^k` seconds
const BACKOFF_BASE_FLOOR_MS: u64 = 1_000;

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dispatcher: DispatcherConfig,
    pub transport: TransportConfig,
}

/// Failure-handling parameters for one dispatcher instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Name used in logs and circuit-open errors
    pub service_name: String,
    /// Consecutive failed requests before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is allowed
    pub break_duration_ms: u64,
    /// Deadline for each individual transport attempt
    pub per_attempt_timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base of the exponential backoff; retry k waits `base^k`
    pub backoff_base_ms: u64,
    /// Upper bound for a single backoff wait
    pub max_backoff_ms: u64,
    /// Maximum jitter as a fraction of the backoff delay
    pub jitter: f64,
    /// Optional deadline for the whole logical request, retries included
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            service_name: "downstream".to_string(),
            failure_threshold: 5,
            break_duration_ms: 1_000,
            per_attempt_timeout_ms: 120,
            max_retries: 3,
            backoff_base_ms: 2_000,
            max_backoff_ms: 30_000,
            jitter: 0.0,
            request_timeout_ms: None,
        }
    }
}

impl DispatcherConfig {
    #[must_use]
    pub const fn per_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.per_attempt_timeout_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Breaker parameters derived from this configuration
    #[must_use]
    pub const fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            break_duration: Duration::from_millis(self.break_duration_ms),
        }
    }

    /// Retry parameters derived from this configuration
    #[must_use]
    pub const fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            jitter: self.jitter,
        }
    }
}

/// Settings for the HTTP transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Base URL request paths are resolved against
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            connect_timeout_ms: 2_000,
            user_agent: format!("resilient-dispatch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Values supplied on the command line, applied after file and environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub failure_threshold: Option<u32>,
    pub max_retries: Option<u32>,
    pub per_attempt_timeout_ms: Option<u64>,
    pub break_duration_ms: Option<u64>,
}

impl Config {
    /// Location of the per-user config file, if the platform has one
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("resilient-dispatch").join("config.toml"))
    }

    /// Load configuration from defaults, the default file location and the environment
    pub fn load() -> Result<Self> {
        Self::load_layered(Self::default_path().as_deref(), false)
    }

    /// Load configuration from an explicit file, which must exist
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::load_layered(Some(path), true)
    }

    fn load_layered(path: Option<&Path>, required: bool) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            debug!("Reading configuration file {}", path.display());
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(required),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;

        info!(
            service = %config.dispatcher.service_name,
            base_url = %config.transport.base_url,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Apply command-line overrides and re-validate
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<()> {
        if let Some(base_url) = &overrides.base_url {
            self.transport.base_url.clone_from(base_url);
        }
        if let Some(threshold) = overrides.failure_threshold {
            self.dispatcher.failure_threshold = threshold;
        }
        if let Some(retries) = overrides.max_retries {
            self.dispatcher.max_retries = retries;
        }
        if let Some(timeout) = overrides.per_attempt_timeout_ms {
            self.dispatcher.per_attempt_timeout_ms = timeout;
        }
        if let Some(duration) = overrides.break_duration_ms {
            self.dispatcher.break_duration_ms = duration;
        }
        self.validate()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let d = &self.dispatcher;

        if d.failure_threshold == 0 {
            return Err(invalid("failure_threshold", "must be at least 1"));
        }
        if d.break_duration_ms == 0 {
            return Err(invalid("break_duration_ms", "must be greater than zero"));
        }
        if d.per_attempt_timeout_ms == 0 {
            return Err(invalid("per_attempt_timeout_ms", "must be greater than zero"));
        }
        if d.backoff_base_ms <= BACKOFF_BASE_FLOOR_MS {
            return Err(invalid(
                "backoff_base_ms",
                "must be above 1000 so that backoff delays grow",
            ));
        }
        if d.max_backoff_ms == 0 {
            return Err(invalid("max_backoff_ms", "must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&d.jitter) {
            return Err(invalid("jitter", "must be between 0.0 and 1.0"));
        }
        if d.request_timeout_ms == Some(0) {
            return Err(invalid("request_timeout_ms", "must be greater than zero"));
        }
        if d.service_name.trim().is_empty() {
            return Err(invalid("service_name", "must not be empty"));
        }

        let base_url = url::Url::parse(&self.transport.base_url)
            .map_err(|e| invalid("base_url", &e.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(invalid("base_url", "scheme must be http or https"));
        }

        Ok(())
    }

    /// Render the configuration as a TOML document
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn invalid(field: &str, reason: &str) -> Error {
    Error::InvalidInput {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
