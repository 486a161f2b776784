// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Benchmarks for cache operations.

#![expect(missing_docs, reason = "Benchmark code does not require documentation")]

use std::hint::black_box;
use std::time::Duration;

use cachery::{Cache, CacheConfig, CacheManager};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};

criterion_group!(benches, bench_reads, bench_writes, bench_sweep);
criterion_main!(benches);

const ENTRIES: u64 = 10_000;

fn populated_cache(refresh: bool) -> (CacheManager, Cache<u64, u64>) {
    let manager = CacheManager::new();
    let cache = manager
        .create_cache::<u64, u64>(
            "bench",
            CacheConfig::builder()
                .ttl(Duration::from_secs(600))
                .refresh(refresh)
                .build()
                .unwrap(),
        )
        .unwrap();
    for key in 0..ENTRIES {
        cache.put(key, key).unwrap();
    }
    (manager, cache)
}

fn bench_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("reads");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_hit", |b| {
        let (_manager, cache) = populated_cache(false);
        let mut key = 0_u64;
        b.iter(|| {
            let value = cache.get(black_box(&key));
            key = (key + 1) % ENTRIES;
            black_box(value)
        });
    });

    group.bench_function("get_hit_refreshing", |b| {
        let (_manager, cache) = populated_cache(true);
        let mut key = 0_u64;
        b.iter(|| {
            let value = cache.get(black_box(&key));
            key = (key + 1) % ENTRIES;
            black_box(value)
        });
    });

    group.bench_function("get_miss", |b| {
        let (_manager, cache) = populated_cache(false);
        b.iter(|| black_box(cache.get(black_box(&u64::MAX))));
    });

    group.finish();
}

fn bench_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("writes");
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_new", |b| {
        let (_manager, cache) = populated_cache(false);
        let mut key = ENTRIES;
        b.iter(|| {
            cache.put(key, key).unwrap();
            key += 1;
        });
    });

    group.bench_function("put_overwrite", |b| {
        let (_manager, cache) = populated_cache(false);
        let mut key = 0_u64;
        b.iter(|| {
            black_box(cache.put(key, key).unwrap());
            key = (key + 1) % ENTRIES;
        });
    });

    group.bench_function("remove_and_put", |b| {
        let (_manager, cache) = populated_cache(false);
        let mut key = 0_u64;
        b.iter(|| {
            black_box(cache.remove(&key));
            cache.put(key, key).unwrap();
            key = (key + 1) % ENTRIES;
        });
    });

    group.finish();
}

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");

    group.bench_function("sweep_nothing_due", |b| {
        let (manager, _cache) = populated_cache(false);
        b.iter(|| black_box(manager.sweep()));
    });

    group.finish();
}
