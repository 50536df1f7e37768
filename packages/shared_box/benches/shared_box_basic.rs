//! Basic benchmarks for the `shared_box` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use shared_box::{ExclusiveBox, SharedBox};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = usize;
const TEST_VALUE: TestItem = 1024;

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("shared_box_basic");

    let allocs_op = allocs.operation("exclusive_new_drop");
    group.bench_function("exclusive_new_drop", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(ExclusiveBox::new(black_box(TEST_VALUE))));
            }

            start.elapsed()
        });
    });

    // One allocation: the value lives next to its control block.
    let allocs_op = allocs.operation("shared_new_fused");
    group.bench_function("shared_new_fused", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(SharedBox::new(black_box(TEST_VALUE))));
            }

            start.elapsed()
        });
    });

    // Two allocations: the boxed value and a separate control block.
    let allocs_op = allocs.operation("shared_from_box");
    group.bench_function("shared_from_box", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(SharedBox::from_box(Box::new(black_box(
                    TEST_VALUE,
                )))));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("shared_from_exclusive");
    group.bench_function("shared_from_exclusive", |b| {
        b.iter_custom(|iters| {
            let exclusives = iter::repeat_with(|| ExclusiveBox::new(TEST_VALUE))
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for exclusive in exclusives {
                drop(black_box(SharedBox::from_exclusive(exclusive)));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("shared_clone_drop");
    group.bench_function("shared_clone_drop", |b| {
        b.iter_custom(|iters| {
            let shared = SharedBox::new(TEST_VALUE);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(shared.clone()));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("shared_read");
    group.bench_function("shared_read", |b| {
        b.iter_custom(|iters| {
            let shared = SharedBox::new(TEST_VALUE);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                black_box(*black_box(&shared).get().unwrap());
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
