//! Storage backend benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use perfdb_bench::{open_backend, populate, trial_fields, BACKENDS};
use perfdb_storage::Query;
use serde_json::json;

/// Benchmark single inserts, each in its own implicit transaction.
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.sample_size(20);

    for name in BACKENDS {
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            let (backend, _dir) = open_backend(name);
            let mut n = 0;
            b.iter(|| {
                n += 1;
                let record = backend.insert("trial", black_box(trial_fields(n))).unwrap();
                black_box(record);
            });
        });
    }
    group.finish();
}

/// Benchmark batched inserts inside one explicit transaction.
fn bench_batch_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_insert");
    group.sample_size(10);

    for name in BACKENDS {
        for batch in [10usize, 100] {
            group.throughput(Throughput::Elements(batch as u64));
            group.bench_with_input(BenchmarkId::new(name, batch), &batch, |b, &batch| {
                let (backend, _dir) = open_backend(name);
                b.iter(|| populate(backend.as_ref(), "trial", batch));
            });
        }
    }
    group.finish();
}

/// Benchmark field searches over a populated table.
fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");

    for name in BACKENDS {
        for count in [100usize, 1000] {
            group.throughput(Throughput::Elements(count as u64));
            group.bench_with_input(BenchmarkId::new(name, count), &count, |b, &count| {
                let (backend, _dir) = open_backend(name);
                populate(backend.as_ref(), "trial", count);
                let query = Query::field("label", "trial-3");
                b.iter(|| {
                    let found = backend.search("trial", black_box(&query)).unwrap();
                    black_box(found);
                });
            });
        }
    }
    group.finish();
}

/// Benchmark element searches inside array fields.
fn bench_search_inside(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_inside");

    for name in BACKENDS {
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            let (backend, _dir) = open_backend(name);
            populate(backend.as_ref(), "trial", 1000);
            let needle = json!(5);
            b.iter(|| {
                let found = backend
                    .search_inside("trial", "phases", black_box(&needle))
                    .unwrap();
                black_box(found);
            });
        });
    }
    group.finish();
}

/// Benchmark the cost of an empty transaction scope.
fn bench_transaction_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("transaction_overhead");

    for name in BACKENDS {
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            let (backend, _dir) = open_backend(name);
            b.iter(|| {
                backend.enter_transaction().unwrap();
                backend.exit_transaction(true).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_insert,
    bench_batch_insert,
    bench_search,
    bench_search_inside,
    bench_transaction_overhead,
);

criterion_main!(benches);
