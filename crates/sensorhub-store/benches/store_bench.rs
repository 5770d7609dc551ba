//! Benchmarks for the sensorhub record store.
//!
//! Run with: cargo bench --package sensorhub-store
//!
//! ## Benchmark Categories
//!
//! - **Writes**: insert and update into a populated stream
//! - **Scans**: preloaded vs lazy cursors
//! - **Counts**: capped counts and histograms
//! - **Journal**: durable appends and replay

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sensorhub_store::{
    BackingIndex, JournalConfig, LogIndex, LogPayloadStore, MemoryIndex, MemoryPayloadStore,
    Payload, PayloadRef, RecordSchema, ScanOrder, SyncMode, TimeFilter, TimeKey, TimeSeriesStore,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Observation payload similar in size to one weather station record.
fn observation(i: usize) -> Payload {
    let temp = 20.0 + (i as f64 * 0.1).sin();
    Payload::from(format!("{{\"temp\":{temp:.2},\"rh\":55.0}}").into_bytes())
}

fn populated(count: usize) -> TimeSeriesStore<MemoryIndex, MemoryPayloadStore> {
    let store = TimeSeriesStore::new(
        RecordSchema::new("weather", &b"temp:f64,rh:f64"[..]),
        MemoryIndex::new(),
        Arc::new(MemoryPayloadStore::new()),
    );
    for i in 0..count {
        store.store(i as f64, observation(i)).unwrap();
    }
    store
}

fn bench_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("writes");

    for size in [1_000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("store", size), &size, |b, &size| {
            b.iter(|| black_box(populated(size)));
        });

        let store = populated(size);
        group.bench_with_input(BenchmarkId::new("update", size), &size, |b, &size| {
            b.iter(|| {
                for i in 0..size {
                    store.update(i as f64, observation(i)).unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_scans(c: &mut Criterion) {
    let mut group = c.benchmark_group("scans");
    let store = populated(10_000);
    let filter = TimeFilter::new(2_500.0, 7_499.0).unwrap();
    group.throughput(Throughput::Elements(5_000));

    for preload in [true, false] {
        group.bench_with_input(BenchmarkId::new("preload", preload), &preload, |b, &preload| {
            b.iter(|| {
                let n = store
                    .scan(&filter, ScanOrder::Ascending, preload)
                    .map(|e| e.unwrap())
                    .count();
                black_box(n)
            });
        });
    }

    group.finish();
}

fn bench_counts(c: &mut Criterion) {
    let mut group = c.benchmark_group("counts");
    let store = populated(10_000);

    group.bench_function("count_matching_capped", |b| {
        b.iter(|| black_box(store.count_matching(&TimeFilter::all(), 1_000).unwrap()));
    });

    let boundaries = sensorhub_store::uniform_boundaries(0.0, 10_000.0, 20).unwrap();
    group.bench_function("estimated_counts_20_bins", |b| {
        b.iter(|| black_box(store.estimated_counts(&boundaries).unwrap()));
    });

    group.finish();
}

fn bench_journal(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal");
    let config = JournalConfig::default().with_sync_mode(SyncMode::None);
    group.throughput(Throughput::Elements(1_000));

    group.bench_function("durable_store_1000", |b| {
        b.iter_with_setup(TempDir::new, |dir| {
            let dir = dir.unwrap();
            let payloads =
                Arc::new(LogPayloadStore::open(dir.path().join("payloads"), config.clone()).unwrap());
            let index = LogIndex::open(dir.path().join("index"), config.clone()).unwrap();
            let store = TimeSeriesStore::new(RecordSchema::new("weather", &b""[..]), index, payloads);
            for i in 0..1_000 {
                store.store(i as f64, observation(i)).unwrap();
            }
        });
    });

    let dir = TempDir::new().unwrap();
    {
        let mut index = LogIndex::open(dir.path(), config.clone()).unwrap();
        for i in 0..1_000u64 {
            index
                .insert(TimeKey::new(i as f64).unwrap(), PayloadRef::new(i))
                .unwrap();
        }
    }
    group.bench_function("replay_1000", |b| {
        b.iter(|| black_box(LogIndex::open(dir.path(), config.clone()).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_writes, bench_scans, bench_counts, bench_journal);
criterion_main!(benches);
