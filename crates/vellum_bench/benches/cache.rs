//! Table cache hot-path benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vellum_bench::{bench_cache, populate, random_data, random_keys};

/// Benchmark single-record transactional writes.
fn bench_put_safe(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_safe");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (cache, table) = bench_cache(1024);
            let data = random_data(size);
            let mut key = 0u64;

            b.iter(|| {
                key = (key + 1) % 4096;
                cache
                    .run(&[table.lock_id(&key)], |proc| {
                        table.put_safe(proc, key, black_box(data.clone()))
                    })
                    .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark reads served from the read cache and from the dirty set.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    group.bench_function("dirty", |b| {
        let (cache, table) = bench_cache(64);
        populate(&cache, &table, 1000, 256);
        let keys = random_keys(1000, 1000);
        let mut i = 0;

        b.iter(|| {
            let key = keys[i % keys.len()];
            i += 1;
            let locks = cache.locks().acquire(&[table.lock_id(&key)]);
            black_box(table.get(&locks, &key).unwrap());
        });
    });

    group.bench_function("cached", |b| {
        let (cache, table) = bench_cache(2048);
        populate(&cache, &table, 1000, 256);
        cache.checkpoint().unwrap();
        let keys = random_keys(1000, 1000);
        let mut i = 0;

        b.iter(|| {
            let key = keys[i % keys.len()];
            i += 1;
            let locks = cache.locks().acquire(&[table.lock_id(&key)]);
            black_box(table.get(&locks, &key).unwrap());
        });
    });

    group.bench_function("storage_miss", |b| {
        let (cache, table) = bench_cache(1);
        populate(&cache, &table, 1000, 256);
        cache.checkpoint().unwrap();
        let keys = random_keys(1000, 1000);
        let mut i = 0;

        b.iter(|| {
            let key = keys[i % keys.len()];
            i += 1;
            let locks = cache.locks().acquire(&[table.lock_id(&key)]);
            black_box(table.get_no_cache(&locks, &key).unwrap());
        });
    });

    group.finish();
}

/// Benchmark read-modify-write through a tracked wrapper.
fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");

    for records in [1u64, 8, 32].iter() {
        group.throughput(Throughput::Elements(*records));
        group.bench_with_input(BenchmarkId::from_parameter(records), records, |b, &records| {
            let (cache, table) = bench_cache(1024);
            populate(&cache, &table, records, 64);
            let ids: Vec<_> = (0..records).map(|k| table.lock_id(&k)).collect();

            b.iter(|| {
                cache
                    .run(&ids, |proc| {
                        for key in 0..records {
                            if let Some(record) = table.get_safe(proc, &key)? {
                                record.update(|bytes| bytes[0] = bytes[0].wrapping_add(1));
                            }
                        }
                        Ok(())
                    })
                    .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark transactions that roll back every change.
fn bench_rollback(c: &mut Criterion) {
    c.bench_function("rollback_8", |b| {
        let (cache, table) = bench_cache(1024);
        populate(&cache, &table, 8, 64);
        let ids: Vec<_> = (0..8u64).map(|k| table.lock_id(&k)).collect();

        b.iter(|| {
            let proc = cache.begin(&ids).unwrap();
            for key in 0..8u64 {
                if let Some(record) = table.get_safe(&proc, &key).unwrap() {
                    record.update(|bytes| bytes[0] = 0);
                }
            }
            proc.rollback();
        });
    });
}

criterion_group!(
    benches,
    bench_put_safe,
    bench_get,
    bench_update,
    bench_rollback
);
criterion_main!(benches);
