//! Composition root of the failure-handling chain.
//!
//! The policies are applied in a fixed order, outermost first:
//!
//! ```text
//! CircuitBreaker           once per logical request, counts the final outcome
//!   TimeoutGuard           optional deadline for the whole request
//!     RetryScheduler       up to max_retries + 1 attempts with backoff
//!       TimeoutGuard       per-attempt deadline, cancels the transport call
//!         Transport::send
//! ```
//!
//! Swapping layers changes behaviour: a breaker inside the retry loop would
//! retry against an open circuit and count every attempt separately.

use super::message::{
    is_transient_failure, FailureKind, Request, Response, TransientClassifier,
};
use super::transport::Transport;
use crate::config::DispatcherConfig;
use crate::resilience::{
    AttemptResult, BreakerObserver, CircuitBreaker, CircuitBreakerMetrics, CircuitState,
    RetryScheduler, TimeoutGuard, TracingObserver,
};
use crate::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// Dispatches requests through breaker, timeouts and retries.
///
/// One instance is shared by all concurrent callers; the breaker state is
/// the only thing they contend on.
pub struct ResilientDispatcher {
    transport: Arc<dyn Transport>,
    breaker: CircuitBreaker,
    request_timeout: Option<TimeoutGuard>,
    retry: RetryScheduler,
    attempt_timeout: TimeoutGuard,
    classifier: TransientClassifier,
}

/// Builder for [`ResilientDispatcher`]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn BreakerObserver>,
    classifier: TransientClassifier,
}

impl DispatcherBuilder {
    /// Receive breaker transitions somewhere other than the log
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn BreakerObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replace the default `status >= 500` transient classification
    #[must_use]
    pub fn classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    #[must_use]
    pub fn build(self) -> ResilientDispatcher {
        let name = self.config.service_name.clone();

        ResilientDispatcher {
            transport: self.transport,
            breaker: CircuitBreaker::with_observer(
                name.clone(),
                self.config.circuit_breaker_config(),
                self.observer,
            ),
            request_timeout: self
                .config
                .request_timeout()
                .map(|timeout| TimeoutGuard::new(format!("{name} request"), timeout)),
            retry: RetryScheduler::new(name.clone(), self.config.retry_config()),
            attempt_timeout: TimeoutGuard::new(
                format!("{name} attempt"),
                self.config.per_attempt_timeout(),
            ),
            classifier: self.classifier,
        }
    }
}

impl ResilientDispatcher {
    /// Create a dispatcher with the default observer and classifier
    pub fn new(config: &DispatcherConfig, transport: Arc<dyn Transport>) -> Self {
        Self::builder(config, transport).build()
    }

    pub fn builder(config: &DispatcherConfig, transport: Arc<dyn Transport>) -> DispatcherBuilder {
        DispatcherBuilder {
            config: config.clone(),
            transport,
            observer: Arc::new(TracingObserver),
            classifier: Arc::new(is_transient_failure),
        }
    }

    /// Dispatch a request. Never fails: faults become synthesized responses.
    pub async fn dispatch(&self, request: Request) -> Response {
        self.dispatch_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Dispatch a request the caller may abandon through `cancel`
    pub async fn dispatch_with_cancel(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Response {
        let span = info_span!(
            "dispatch",
            request_id = %Uuid::new_v4(),
            method = %request.method,
            path = %request.path,
        );

        async {
            let outcome = self.execute(&request, cancel).await;
            self.finish(outcome)
        }
        .instrument(span)
        .await
    }

    /// Run the full policy chain and return the classified outcome
    pub async fn execute(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> AttemptResult<Response> {
        self.breaker
            .guard(move || async move {
                match &self.request_timeout {
                    Some(guard) => {
                        guard
                            .guard(move |token| self.run_with_retries(request, token), cancel)
                            .await
                    }
                    None => self.run_with_retries(request, cancel.clone()).await,
                }
            })
            .await
    }

    async fn run_with_retries(
        &self,
        request: &Request,
        cancel: CancellationToken,
    ) -> AttemptResult<Response> {
        let cancel = &cancel;

        self.retry
            .run(
                move |attempt| async move {
                    debug!(attempt, "Sending attempt");
                    self.attempt_timeout
                        .guard(move |token| self.send_once(request, token), cancel)
                        .await
                },
                cancel,
            )
            .await
    }

    /// One transport call, classified
    async fn send_once(&self, request: &Request, token: CancellationToken) -> AttemptResult<Response> {
        match self.transport.send(request, token).await {
            Ok(response) if (self.classifier)(&response) => {
                AttemptResult::TransientFailure(Error::ServerFault {
                    status: response.status.as_u16(),
                })
            }
            Ok(response) => AttemptResult::Success(response),
            Err(error) => AttemptResult::from_error(error),
        }
    }

    fn finish(&self, outcome: AttemptResult<Response>) -> Response {
        let (kind, detail) = match outcome {
            AttemptResult::Success(response) => return response,
            AttemptResult::FatalFailure(error @ Error::CircuitBreakerOpen { .. }) => {
                (FailureKind::CircuitOpen, error.to_string())
            }
            AttemptResult::FatalFailure(Error::Cancelled) => {
                (FailureKind::Cancelled, Error::Cancelled.to_string())
            }
            AttemptResult::FatalFailure(error) => (FailureKind::Rejected, error.to_string()),
            AttemptResult::Timeout(timeout) => (
                FailureKind::Timeout,
                Error::Timeout { timeout }.to_string(),
            ),
            AttemptResult::TransientFailure(error) => {
                (FailureKind::UpstreamFailure, error.to_string())
            }
        };

        warn!(
            service = %self.breaker.name(),
            failure = kind.as_str(),
            "Request failed: {}",
            detail
        );
        Response::synthesized(kind, &detail)
    }

    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    #[must_use]
    pub fn breaker_metrics(&self) -> CircuitBreakerMetrics {
        self.breaker.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Transport answering with a fixed status and counting calls
    struct StatusTransport {
        status: StatusCode,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transport for StatusTransport {
        async fn send(&self, _request: &Request, _cancel: CancellationToken) -> Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(self.status))
        }
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            failure_threshold: 2,
            max_retries: 1,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_pass_through() {
        let transport = Arc::new(StatusTransport {
            status: StatusCode::NOT_FOUND,
            calls: AtomicU32::new(0),
        });
        let dispatcher = ResilientDispatcher::new(&config(), transport.clone());

        let response = dispatcher.dispatch(Request::get("/missing")).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(!response.is_synthesized());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_faults_are_retried_then_synthesized() {
        let transport = Arc::new(StatusTransport {
            status: StatusCode::SERVICE_UNAVAILABLE,
            calls: AtomicU32::new(0),
        });
        let dispatcher = ResilientDispatcher::new(&config(), transport.clone());

        let response = dispatcher.dispatch(Request::get("/flaky")).await;
        assert_eq!(response.failure, Some(FailureKind::UpstreamFailure));
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);

        // One logical request counts once toward the breaker
        assert_eq!(dispatcher.breaker_metrics().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_classifier() {
        let transport = Arc::new(StatusTransport {
            status: StatusCode::TOO_MANY_REQUESTS,
            calls: AtomicU32::new(0),
        });
        let dispatcher = ResilientDispatcher::builder(&config(), transport.clone())
            .classifier(|response| response.status == StatusCode::TOO_MANY_REQUESTS)
            .build();

        let response = dispatcher.dispatch(Request::get("/limited")).await;
        assert_eq!(response.failure, Some(FailureKind::UpstreamFailure));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_bounds_whole_retry_loop() {
        struct HangingTransport;

        #[async_trait]
        impl Transport for HangingTransport {
            async fn send(&self, _request: &Request, cancel: CancellationToken) -> Result<Response> {
                cancel.cancelled().await;
                Err(Error::Cancelled)
            }
        }

        let config = DispatcherConfig {
            per_attempt_timeout_ms: 100,
            max_retries: 10,
            backoff_base_ms: 2_000,
            request_timeout_ms: Some(250),
            ..Default::default()
        };
        let dispatcher = ResilientDispatcher::new(&config, Arc::new(HangingTransport));

        let start = tokio::time::Instant::now();
        let response = dispatcher.dispatch(Request::get("/slow")).await;

        assert_eq!(response.failure, Some(FailureKind::Timeout));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
