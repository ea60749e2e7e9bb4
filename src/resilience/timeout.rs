use super::attempt::AttemptResult;
use crate::Error;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bounds the execution time of an operation.
///
/// The operation receives a child of the caller's cancellation token. When
/// the deadline elapses first that token is cancelled, the in-flight future
/// is dropped and the result is `Timeout`. An operation that settles in the
/// same poll as the caller's cancellation keeps its own outcome.
#[derive(Debug, Clone)]
pub struct TimeoutGuard {
    operation_name: String,
    timeout: Duration,
}

impl TimeoutGuard {
    /// Create a new timeout guard
    pub fn new(operation_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            operation_name: operation_name.into(),
            timeout,
        }
    }

    /// Race `operation` against the deadline and the caller's cancellation
    pub async fn guard<T, F, Fut>(&self, operation: F, cancel: &CancellationToken) -> AttemptResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = AttemptResult<T>>,
    {
        let attempt_token = cancel.child_token();
        let start_time = Instant::now();

        tokio::select! {
            biased;

            outcome = operation(attempt_token.clone()) => {
                debug!(
                    "Operation '{}' finished in {:?}",
                    self.operation_name,
                    start_time.elapsed()
                );
                outcome
            }
            () = cancel.cancelled() => {
                debug!(
                    "Operation '{}' cancelled by caller after {:?}",
                    self.operation_name,
                    start_time.elapsed()
                );
                AttemptResult::FatalFailure(Error::Cancelled)
            }
            () = sleep(self.timeout) => {
                attempt_token.cancel();
                warn!(
                    "Operation '{}' timed out after {:?}",
                    self.operation_name, self.timeout
                );
                AttemptResult::Timeout(self.timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_completion_passes_through() {
        let guard = TimeoutGuard::new("test", Duration::from_millis(100));
        let cancel = CancellationToken::new();

        let result = guard
            .guard(|_| async { AttemptResult::Success(42) }, &cancel)
            .await;
        assert!(matches!(result, AttemptResult::Success(42)));

        let result = guard
            .guard(
                |_| async { AttemptResult::<u32>::TransientFailure(Error::ServerFault { status: 503 }) },
                &cancel,
            )
            .await;
        assert!(matches!(result, AttemptResult::TransientFailure(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_operation_token() {
        let guard = TimeoutGuard::new("slow", Duration::from_millis(120));
        let cancel = CancellationToken::new();
        let seen: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));

        let seen_clone = seen.clone();
        let start = Instant::now();
        let result = guard
            .guard(
                move |token| async move {
                    *seen_clone.lock() = Some(token);
                    sleep(Duration::from_secs(10)).await;
                    AttemptResult::Success(())
                },
                &cancel,
            )
            .await;

        assert!(matches!(result, AttemptResult::Timeout(t) if t == Duration::from_millis(120)));
        assert!(start.elapsed() >= Duration::from_millis(120));

        let token = seen.lock().clone().expect("operation should have started");
        assert!(token.is_cancelled());
        // The caller's own token is untouched by a per-attempt timeout
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation_is_fatal() {
        let guard = TimeoutGuard::new("cancelled", Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = guard
            .guard(
                |_| async {
                    sleep(Duration::from_secs(60)).await;
                    AttemptResult::Success(())
                },
                &cancel,
            )
            .await;

        assert!(result.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_outcome_wins_over_simultaneous_cancellation() {
        let guard = TimeoutGuard::new("cooperative", Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = guard
            .guard(
                |token| async move {
                    token.cancelled().await;
                    AttemptResult::<()>::TransientFailure(Error::Transport("aborted".to_string()))
                },
                &cancel,
            )
            .await;

        assert!(matches!(result, AttemptResult::TransientFailure(_)));
    }
}
