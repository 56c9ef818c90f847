//! Benchmark for Deferred resolution, notification and combinators.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use deferred::combinator::combine;
use deferred::context::{self, ExecutionContext, SerialContext};
use deferred::{Deferred, DeferredError};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::mpsc;

// =============================================================================
// Resolution Benchmarks
// =============================================================================

fn benchmark_resolution(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("resolution");

    group.bench_function("resolved_peek", |bencher| {
        bencher.iter(|| {
            let deferred = Deferred::<u64, DeferredError>::resolved(black_box(7));
            black_box(deferred.peek().cloned())
        });
    });

    group.bench_function("pending_then_resolve", |bencher| {
        bencher.iter(|| {
            let (deferred, resolver) =
                Deferred::<u64, DeferredError>::pending(context::default_context());
            resolver.resolve_value(black_box(7));
            black_box(deferred.get())
        });
    });

    group.bench_function("lazy_task_get", |bencher| {
        bencher.iter(|| {
            let deferred = Deferred::<u64, DeferredError>::new(|resolver| {
                resolver.resolve_value(7);
            });
            black_box(deferred.get())
        });
    });

    group.finish();
}

// =============================================================================
// Notification Benchmarks
// =============================================================================

fn benchmark_notification(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("notification");
    let serial: Arc<dyn ExecutionContext> = Arc::new(SerialContext::new("bench"));

    for handlers in [1, 16, 256] {
        group.bench_with_input(
            BenchmarkId::new("handlers_before_resolution", handlers),
            &handlers,
            |bencher, &handlers| {
                bencher.iter(|| {
                    let (deferred, resolver) =
                        Deferred::<u64, DeferredError>::pending(Arc::clone(&serial));
                    let (sender, receiver) = mpsc::channel();
                    for _ in 0..handlers {
                        let sender = sender.clone();
                        deferred.notify(move |result| {
                            let _ = sender.send(result.is_ok());
                        });
                    }
                    resolver.resolve_value(1);
                    for _ in 0..handlers {
                        black_box(receiver.recv().ok());
                    }
                });
            },
        );
    }

    group.finish();
}

// =============================================================================
// Combinator Benchmarks
// =============================================================================

fn benchmark_combinators(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("combinators");

    group.bench_function("map_chain_10", |bencher| {
        bencher.iter(|| {
            let mut deferred = Deferred::<u64, DeferredError>::resolved(0);
            for _ in 0..10 {
                deferred = deferred.map(|value| value + 1);
            }
            black_box(deferred.get())
        });
    });

    for inputs in [4, 64] {
        group.bench_with_input(BenchmarkId::new("combine", inputs), &inputs, |bencher, &inputs| {
            bencher.iter(|| {
                let sources: Vec<_> = (0..inputs)
                    .map(Deferred::<u64, DeferredError>::resolved)
                    .collect();
                black_box(combine(sources).get())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_resolution,
    benchmark_notification,
    benchmark_combinators
);
criterion_main!(benches);
