#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use resilient_dispatch::{BreakerObserver, Error, Request, Response, Result, Transport};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a scripted transport does on one call
#[derive(Debug, Clone)]
pub enum Step {
    Respond(u16),
    /// Respond with the status after a delay
    Slow(Duration, u16),
    Fail,
    Hang,
}

/// Transport replaying a script, repeating the last step once exhausted
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    calls: AtomicU32,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let steps: VecDeque<Step> = steps.into_iter().collect();
        let last = steps.back().cloned().unwrap_or(Step::Respond(200));
        Self {
            steps: Mutex::new(steps),
            last: Mutex::new(last),
            calls: AtomicU32::new(0),
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn always(step: Step) -> Self {
        Self::new([step])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls whose cancellation token has been fired
    pub fn cancelled(&self) -> usize {
        self.tokens.lock().iter().filter(|t| t.is_cancelled()).count()
    }

    fn next_step(&self) -> Step {
        self.steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.last.lock().clone())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _request: &Request, cancel: CancellationToken) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().push(cancel.clone());

        match self.next_step() {
            Step::Respond(status) => Ok(Response::new(
                StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
            )
            .with_body(format!("status {status}"))),
            Step::Slow(delay, status) => {
                tokio::time::sleep(delay).await;
                Ok(Response::new(StatusCode::from_u16(status).unwrap_or(StatusCode::OK)))
            }
            Step::Fail => Err(Error::Transport("connection reset by peer".to_string())),
            Step::Hang => {
                tokio::select! {
                    () = cancel.cancelled() => Err(Error::Cancelled),
                    () = tokio::time::sleep(Duration::from_secs(3600)) => {
                        Ok(Response::new(StatusCode::OK))
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Break(Duration),
    Reset,
    HalfOpen,
}

/// Observer recording every breaker notification
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl BreakerObserver for RecordingObserver {
    fn on_break(&self, _service: &str, _cause: &Error, break_duration: Duration) {
        self.events.lock().push(Event::Break(break_duration));
    }

    fn on_reset(&self, _service: &str) {
        self.events.lock().push(Event::Reset);
    }

    fn on_half_open(&self, _service: &str) {
        self.events.lock().push(Event::HalfOpen);
    }
}
