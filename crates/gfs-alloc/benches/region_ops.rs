//! Benchmark: region allocator churn patterns.
//!
//! Measures contiguous allocation, fragmented allocation after hole
//! punching, and free-with-merge, over a pool sized like a 4 GiB image.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use gfs_alloc::{Region, RegionAllocator};

const POOL_BLOCKS: u32 = 1 << 20; // 4 GiB at 4K blocks

fn fragmented_pool() -> RegionAllocator {
    let mut alloc = RegionAllocator::new(POOL_BLOCKS);
    // Punch a hole every 4096 blocks (≈ metadata cadence).
    let mut at = 1024_u32;
    while at + 64 < POOL_BLOCKS {
        alloc.mark_used(Region::new(at, 64)).unwrap();
        at += 4096;
    }
    alloc
}

fn bench_allocate_contiguous(c: &mut Criterion) {
    c.bench_function("allocate_contiguous_256", |b| {
        b.iter_batched(
            || RegionAllocator::new(POOL_BLOCKS),
            |mut alloc| black_box(alloc.allocate(black_box(256)).unwrap()),
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_allocate_fragmented(c: &mut Criterion) {
    c.bench_function("allocate_fragmented_16k", |b| {
        b.iter_batched(
            fragmented_pool,
            |mut alloc| black_box(alloc.allocate(black_box(16_384)).unwrap()),
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_free_merge(c: &mut Criterion) {
    c.bench_function("free_with_merge", |b| {
        b.iter_batched(
            || {
                let mut alloc = RegionAllocator::new(POOL_BLOCKS);
                let allocations: Vec<_> =
                    (0..64).map(|_| alloc.allocate(512).unwrap()).collect();
                (alloc, allocations)
            },
            |(mut alloc, allocations)| {
                for a in allocations {
                    alloc.free(a);
                }
                black_box(alloc.free_blocks())
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_allocate_contiguous,
    bench_allocate_fragmented,
    bench_free_merge,
);
criterion_main!(benches);
