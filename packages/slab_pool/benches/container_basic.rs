//! Basic benchmarks for the `slab_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use slab_pool::{PoolContainer, TypedPool};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = usize;
const TEST_VALUE: TestItem = 1024;

type Pool = PoolContainer<1024>;

fn new_pool() -> Pool {
    Pool::builder().layout_of::<TestItem>().build()
}

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("container_basic");

    let allocs_op = allocs.operation("build_empty");
    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(new_pool()));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("allocate_one");
    group.bench_function("allocate_one", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(new_pool)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.do_allocate());
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("allocate_deallocate_warm");
    group.bench_function("allocate_deallocate_warm", |b| {
        b.iter_custom(|iters| {
            let mut pool = new_pool();

            // Keep one item alive so the slab is not released between iterations.
            let anchor = pool.do_allocate();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let ptr = pool.do_allocate();
                pool.do_deallocate(black_box(ptr));
            }

            let elapsed = start.elapsed();

            pool.do_deallocate(anchor);

            elapsed
        });
    });

    let allocs_op = allocs.operation("is_allocated");
    group.bench_function("is_allocated", |b| {
        b.iter_custom(|iters| {
            let mut pool = new_pool();

            let pointers = (0..4096).map(|_| pool.do_allocate()).collect::<Vec<_>>();
            let last = *pointers.last().unwrap();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                // The last slab is the worst case for the linear slab lookup.
                _ = black_box(pool.is_allocated(black_box(last)));
            }

            start.elapsed()
        });
    });

    group.finish();

    let mut group = c.benchmark_group("container_slow");

    let allocs_op = allocs.operation("allocate_10k");
    group.bench_function("allocate_10k", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(new_pool)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                for _ in 0..10_000 {
                    _ = black_box(pool.do_allocate());
                }
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("forward_10_back_5_times_1000");
    group.bench_function("forward_10_back_5_times_1000", |b| {
        // We allocate 10 items, deallocate the first 5 and repeat this 1000 times.
        // This stresses the free list and free-slab list bookkeeping.
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(new_pool)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let mut to_deallocate = Vec::with_capacity(5);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                for _ in 0..1000 {
                    to_deallocate.clear();

                    for _ in 0..5 {
                        to_deallocate.push(pool.do_allocate());
                    }

                    for _ in 0..5 {
                        _ = black_box(pool.do_allocate());
                    }

                    #[expect(clippy::iter_with_drain, reason = "to avoid moving the value")]
                    for ptr in to_deallocate.drain(..) {
                        pool.do_deallocate(ptr);
                    }
                }
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("fill_and_release_slab");
    group.bench_function("fill_and_release_slab", |b| {
        // Each iteration materializes a slab, fills it and releases it again.
        b.iter_custom(|iters| {
            let mut pool = new_pool();
            let mut pointers = Vec::with_capacity(pool.slab_capacity());

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                for _ in 0..pool.slab_capacity() {
                    pointers.push(pool.do_allocate());
                }

                #[expect(clippy::iter_with_drain, reason = "to reuse the vector")]
                for ptr in pointers.drain(..) {
                    pool.do_deallocate(ptr);
                }
            }

            start.elapsed()
        });
    });

    group.finish();

    let mut group = c.benchmark_group("typed_pool");

    let allocs_op = allocs.operation("insert_remove");
    group.bench_function("insert_remove", |b| {
        b.iter_custom(|iters| {
            let mut pool = TypedPool::<TestItem, 1024>::new();
            let anchor = pool.insert(TEST_VALUE);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let ptr = pool.insert(black_box(TEST_VALUE));
                // SAFETY: The pointer came from this pool and is removed only once.
                _ = black_box(unsafe { pool.remove(ptr) });
            }

            let elapsed = start.elapsed();

            // SAFETY: The anchor came from this pool and is removed only once.
            unsafe { pool.deallocate(anchor) };

            elapsed
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
