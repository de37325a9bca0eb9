//! Allocator benchmarks: arena and pool against the default heap.

use cinder_rt::mem::{heap, Alloc, Arena, Pool, Temp};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::mem::MaybeUninit;

fn bench_alloc_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_64B");

    group.bench_function("heap", |b| {
        b.iter(|| {
            let ptr = heap().alloc(black_box(64), 8).unwrap();
            unsafe { heap().free(ptr) };
        });
    });

    group.bench_function("arena", |b| {
        b.iter_with_large_drop(|| {
            let arena = Arena::new(heap());
            for _ in 0..64 {
                black_box(arena.alloc(black_box(64), 8).unwrap());
            }
            arena
        });
    });

    group.bench_function("pool", |b| {
        let pool = Pool::new(heap(), 64, 8);
        b.iter(|| {
            let ptr = pool.alloc(black_box(64), 8).unwrap();
            unsafe { pool.free(ptr) };
        });
    });

    group.bench_function("temp", |b| {
        let mut storage = vec![MaybeUninit::<u8>::uninit(); 64 * 128];
        let temp = Temp::new(&mut storage);
        b.iter(|| {
            let mark = temp.mark();
            for _ in 0..64 {
                black_box(temp.alloc(black_box(64), 8).unwrap());
            }
            temp.rewind(mark);
        });
    });

    group.finish();
}

fn bench_arena_block_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_block_size");

    for block in [256usize, 4096, 65536] {
        group.bench_with_input(BenchmarkId::from_parameter(block), &block, |b, &block| {
            b.iter_with_large_drop(|| {
                let arena = Arena::with_block_size(heap(), block);
                for _ in 0..1024 {
                    black_box(arena.alloc(24, 8).unwrap());
                }
                arena
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_alloc_throughput, bench_arena_block_sizes);
criterion_main!(benches);
