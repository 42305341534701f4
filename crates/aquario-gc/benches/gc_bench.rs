//! GC Performance Benchmarks
//!
//! Measures allocation throughput and collection pauses per strategy.
//!
//! Run with: `cargo bench -p aquario-gc`

use aquario_gc::{GcConfig, GcRuntime, StrategyKind, Value};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

const HEAP: usize = 1024 * 1024;

fn runtime(kind: StrategyKind) -> GcRuntime {
    GcRuntime::with_config(GcConfig::new(kind, HEAP))
}

/// Short-lived pairs, one at a time on the stack
fn allocation_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");

    for kind in StrategyKind::ALL {
        group.bench_with_input(BenchmarkId::new("churn", kind), &kind, |b, &kind| {
            let mut rt = runtime(kind);
            let mut i = 0;
            b.iter(|| {
                let pair = rt.cons(Value::int(i), Value::NIL).unwrap();
                rt.push(pair).unwrap();
                black_box(rt.pop().unwrap());
                i += 1;
            });
        });
    }

    group.finish();
}

/// Pause time with half of the heap objects live
fn gc_pause_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("gc_pause");

    for kind in StrategyKind::ALL {
        for num_objects in [100, 1000, 5000] {
            group.bench_with_input(
                BenchmarkId::new(kind.short_name(), num_objects),
                &num_objects,
                |b, &n| {
                    b.iter_custom(|iters| {
                        let mut total_duration = std::time::Duration::ZERO;

                        for _ in 0..iters {
                            let mut rt = runtime(kind);
                            rt.push(Value::NIL).unwrap();
                            for i in 0..n {
                                if i % 2 == 0 {
                                    let list = rt.peek(0).unwrap();
                                    let list = rt.cons(Value::int(i), list).unwrap();
                                    rt.pop().unwrap();
                                    rt.push(list).unwrap();
                                } else {
                                    // odd-indexed pairs become garbage
                                    rt.cons(Value::int(i), Value::NIL).unwrap();
                                }
                            }

                            let start = std::time::Instant::now();
                            rt.collect_full().unwrap();
                            total_duration += start.elapsed();

                            black_box(rt.peek(0));
                        }

                        total_duration
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, allocation_benchmark, gc_pause_benchmark);
criterion_main!(benches);
