use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use std::sync::Arc;

/// Header carried by every synthesized failure response
pub const FAILURE_HEADER: &str = "x-dispatch-failure";

/// Outbound request handed to the transport
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Path (and query) resolved against the transport's base URL
    pub path: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// Response returned to the caller, either from downstream or synthesized
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Set only on responses the dispatcher produced itself
    pub failure: Option<FailureKind>,
}

impl Response {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
            failure: None,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Build the server-fault response standing in for a failed request
    #[must_use]
    pub fn synthesized(kind: FailureKind, detail: &str) -> Self {
        let mut response = Self::new(kind.status()).with_body(detail.as_bytes().to_vec());
        response
            .headers
            .insert(FAILURE_HEADER, HeaderValue::from_static(kind.as_str()));
        response.failure = Some(kind);
        response
    }

    #[must_use]
    pub const fn is_synthesized(&self) -> bool {
        self.failure.is_some()
    }
}

/// Why the dispatcher had to synthesize a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// The breaker shed the request without calling downstream
    CircuitOpen,
    /// The last attempt (or the whole request) ran out of time
    Timeout,
    /// The retry loop ended on a transient failure: retries ran out, none
    /// were configured, or the caller cancelled during a backoff wait
    UpstreamFailure,
    /// Downstream failed in a way that is not worth retrying
    Rejected,
    /// The caller cancelled before any transient failure was seen
    Cancelled,
}

impl FailureKind {
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamFailure => StatusCode::BAD_GATEWAY,
            Self::Rejected | Self::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit-open",
            Self::Timeout => "timeout",
            Self::UpstreamFailure => "upstream-failure",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Decides whether a downstream response counts as a transient failure
pub type TransientClassifier = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// Default classification: any status at or above 500
#[must_use]
pub fn is_transient_failure(response: &Response) -> bool {
    response.status.as_u16() >= StatusCode::INTERNAL_SERVER_ERROR.as_u16()
}
