//! Integration tests for concurrent readers and writers on one stream.

use sensorhub_store::{
    MemoryIndex, MemoryPayloadStore, Payload, RecordSchema, ScanOrder, TimeFilter,
    TimeSeriesStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const RECORDS: usize = 500;

fn populated_store() -> TimeSeriesStore<MemoryIndex, MemoryPayloadStore> {
    let store = TimeSeriesStore::new(
        RecordSchema::new("imu", &b"ax,ay,az"[..]),
        MemoryIndex::new(),
        Arc::new(MemoryPayloadStore::new()),
    );
    for i in 0..RECORDS {
        store.store(i as f64, Payload::from("old")).unwrap();
    }
    store
}

#[test]
fn test_writer_progresses_while_cursor_is_parked() {
    let store = populated_store();
    let parked = Barrier::new(2);
    let written = Barrier::new(2);

    thread::scope(|s| {
        s.spawn(|| {
            let mut cursor = store.scan(&TimeFilter::all(), ScanOrder::Ascending, true);
            let first = cursor.next().unwrap().unwrap();
            parked.wait();
            // The writer finishes while this cursor is still alive.
            written.wait();

            assert_eq!(first.cached_value(), Some(&Payload::from("old")));
            let rest: Vec<_> = cursor.map(|e| e.unwrap().into_value().unwrap()).collect();
            assert_eq!(rest.len(), RECORDS - 1);
            assert_eq!(rest[0], Payload::from("new"));
        });

        s.spawn(|| {
            parked.wait();
            store.update(0.0, Payload::from("new")).unwrap();
            store.update(1.0, Payload::from("new")).unwrap();
            written.wait();
        });
    });

    assert_eq!(store.size(), RECORDS as u64);
    assert_eq!(store.payloads().stats().live, RECORDS as u64);
}

#[test]
fn test_scan_under_concurrent_updates_sees_valid_snapshots() {
    let store = populated_store();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            for i in 0..RECORDS {
                store.update(i as f64, Payload::from("new")).unwrap();
            }
            done.store(true, Ordering::Release);
        });

        while !done.load(Ordering::Acquire) {
            let mut last = f64::NEG_INFINITY;
            let mut seen = 0;
            for entry in store.scan(&TimeFilter::all(), ScanOrder::Ascending, true) {
                let entry = entry.unwrap();
                assert!(entry.key() > last);
                last = entry.key();
                let value = entry.cached_value().unwrap();
                assert!(value == &Payload::from("old") || value == &Payload::from("new"));
                seen += 1;
            }
            // Updates never add or drop keys.
            assert_eq!(seen, RECORDS);
        }
    });

    let stats = store.payloads().stats();
    assert_eq!(stats.live, RECORDS as u64);
    assert_eq!(stats.freed, RECORDS as u64);
    assert!(store
        .values(&TimeFilter::all())
        .all(|v| v.unwrap() == Payload::from("new")));
}

#[test]
fn test_concurrent_writers_on_disjoint_keys() {
    let store = TimeSeriesStore::new(
        RecordSchema::new("gps", &b"lat,lon"[..]),
        MemoryIndex::new(),
        Arc::new(MemoryPayloadStore::new()),
    );

    thread::scope(|s| {
        for worker in 0..4 {
            let store = &store;
            s.spawn(move || {
                for i in 0..100 {
                    let ts = (worker * 100 + i) as f64;
                    store.store(ts, Payload::from(vec![worker as u8])).unwrap();
                }
            });
        }
    });

    assert_eq!(store.size(), 400);
    assert_eq!(store.count_matching(&TimeFilter::all(), 1000).unwrap(), 400);
    assert_eq!(store.time_range().unwrap(), (0.0, 399.0));
}

#[test]
fn test_concurrent_bulk_delete_and_counts() {
    let store = populated_store();

    thread::scope(|s| {
        s.spawn(|| {
            let filter = TimeFilter::new(0.0, (RECORDS / 2) as f64 - 1.0).unwrap();
            assert_eq!(store.remove_matching(&filter).unwrap(), (RECORDS / 2) as u64);
        });
        s.spawn(|| {
            for _ in 0..20 {
                let count = store.count_matching(&TimeFilter::all(), u64::MAX).unwrap();
                assert!(count >= (RECORDS / 2) as u64 && count <= RECORDS as u64);
            }
        });
    });

    assert_eq!(store.size(), (RECORDS / 2) as u64);
    assert_eq!(store.payloads().stats().live, (RECORDS / 2) as u64);
}
