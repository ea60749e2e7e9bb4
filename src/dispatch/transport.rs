//! # Transport Port
//!
//! The downstream collaborator the dispatcher protects. A transport performs
//! one network call and must give up promptly once its cancellation token
//! fires; the dispatcher cancels that token on per-attempt timeouts and when
//! the caller abandons the request.

use super::message::{Request, Response};
use crate::config::TransportConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Port interface for the downstream transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` downstream.
    ///
    /// Faults are reported as `Err`; their [`crate::error::ErrorCategory`]
    /// decides whether the dispatcher retries them.
    async fn send(&self, request: &Request, cancel: CancellationToken) -> Result<Response>;
}

/// `reqwest`-backed transport resolving request paths against a base URL
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    connect_timeout: Duration,
}

impl HttpTransport {
    /// Create a new HTTP transport from configuration
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| Error::InvalidInput {
            field: "base_url".to_string(),
            reason: e.to_string(),
        })?;
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .gzip(true)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            client,
            base_url,
            connect_timeout,
        })
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| Error::InvalidInput {
            field: "path".to_string(),
            reason: format!("{path}: {e}"),
        })
    }

    fn map_error(&self, error: reqwest::Error) -> Error {
        if error.is_connect() {
            Error::ConnectionRefused {
                endpoint: self.base_url.to_string(),
            }
        } else if error.is_timeout() {
            Error::Timeout {
                timeout: self.connect_timeout,
            }
        } else {
            Error::Http(error)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &Request, cancel: CancellationToken) -> Result<Response> {
        let url = self.resolve(&request.path)?;
        debug!("Sending {} {}", request.method, url);

        let pending = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            result = pending => result.map_err(|e| self.map_error(e))?,
        };

        let status = response.status();
        let headers = response.headers().clone();

        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            result = response.bytes() => result.map_err(|e| self.map_error(e))?,
        };

        Ok(Response {
            status,
            headers,
            body: body.to_vec(),
            failure: None,
        })
    }
}
