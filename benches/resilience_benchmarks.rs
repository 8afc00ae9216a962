use criterion::{black_box, criterion_group, criterion_main, Criterion};
use resilience_core::resilience::{
    CircuitBreaker, CircuitBreakerConfig, OverallHealth, RateLimiter, RateLimiterConfig,
    RequestCoalescer,
};
use resilience_core::ResilienceError;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("benchmark runtime")
}

fn benchmark_breaker_closed_call(c: &mut Criterion) {
    let rt = runtime();
    let breaker = CircuitBreaker::new("bench", CircuitBreakerConfig::default());

    c.bench_function("breaker_closed_call", |b| {
        b.iter(|| rt.block_on(breaker.run(|| async { Ok(black_box(1u64)) })))
    });
}

fn benchmark_breaker_open_rejection(c: &mut Criterion) {
    let rt = runtime();
    let breaker = CircuitBreaker::new("bench", CircuitBreakerConfig::default());
    breaker.force_open();

    c.bench_function("breaker_open_rejection", |b| {
        b.iter(|| {
            let result: Result<u64, ResilienceError> =
                rt.block_on(breaker.run(|| async { Ok(1) }));
            black_box(result)
        })
    });
}

fn benchmark_limiter_try_acquire(c: &mut Criterion) {
    let limiter = RateLimiter::new("bench", RateLimiterConfig::new(1_000_000.0, 1_000_000.0));

    c.bench_function("limiter_try_acquire", |b| b.iter(|| black_box(limiter.try_acquire())));
}

fn benchmark_coalescer_unique_keys(c: &mut Criterion) {
    let rt = runtime();
    let coalescer: RequestCoalescer<u64, u64> = RequestCoalescer::new();
    let mut key = 0u64;

    c.bench_function("coalescer_unique_key", |b| {
        b.iter(|| {
            key += 1;
            let k = key;
            rt.block_on(coalescer.run(k, move || async move { Ok(k) }))
        })
    });
}

fn benchmark_health_classification(c: &mut Criterion) {
    c.bench_function("health_classify", |b| {
        b.iter(|| OverallHealth::classify(black_box(40), black_box(9), black_box(3)))
    });
}

criterion_group!(
    benches,
    benchmark_breaker_closed_call,
    benchmark_breaker_open_rejection,
    benchmark_limiter_try_acquire,
    benchmark_coalescer_unique_keys,
    benchmark_health_classification
);
criterion_main!(benches);
