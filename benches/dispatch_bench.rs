use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reqwest::StatusCode;
use resilient_dispatch::resilience::NoopObserver;
use resilient_dispatch::{
    AttemptResult, CircuitBreaker, CircuitBreakerConfig, DispatcherConfig, Request,
    ResilientDispatcher, Response, Result, Transport,
};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

struct InstantTransport;

#[async_trait]
impl Transport for InstantTransport {
    async fn send(&self, _request: &Request, _cancel: CancellationToken) -> Result<Response> {
        Ok(Response::new(StatusCode::OK))
    }
}

fn benchmark_breaker_guard(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let breaker = CircuitBreaker::with_observer(
        "bench",
        CircuitBreakerConfig::default(),
        Arc::new(NoopObserver),
    );

    c.bench_function("breaker_guard_success", |b| {
        b.to_async(&runtime).iter(|| async {
            black_box(
                breaker
                    .guard(|| async { AttemptResult::Success(1u32) })
                    .await,
            )
        });
    });
}

fn benchmark_dispatch(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let dispatcher = ResilientDispatcher::builder(&DispatcherConfig::default(), Arc::new(InstantTransport))
        .observer(Arc::new(NoopObserver))
        .build();

    c.bench_function("dispatch_success", |b| {
        b.to_async(&runtime)
            .iter(|| async { black_box(dispatcher.dispatch(Request::get("/")).await) });
    });
}

criterion_group!(benches, benchmark_breaker_guard, benchmark_dispatch);
criterion_main!(benches);
