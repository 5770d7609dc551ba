//! Integration tests for index and payload store failures.
//!
//! Each test arms one fault, drives a store operation into it and checks
//! what the caller observes afterwards.

use sensorhub_store::{
    BackingIndex, KeyRange, MemoryIndex, MemoryPayloadStore, Payload, PayloadRef, PayloadStats,
    PayloadStore, RecordSchema, Result, ScanOrder, StoreError, TimeFilter, TimeKey,
    TimeSeriesStore,
};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Switches shared by a [`FailingIndex`] and a [`FailingPayloadStore`].
#[derive(Debug, Default)]
struct Faults {
    index_reads: AtomicBool,
    index_writes: AtomicBool,
    puts: AtomicBool,
    gets: AtomicBool,
    frees: AtomicBool,
}

impl Faults {
    fn arm(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }

    fn clear(&self) {
        for flag in [
            &self.index_reads,
            &self.index_writes,
            &self.puts,
            &self.gets,
            &self.frees,
        ] {
            flag.store(false, Ordering::SeqCst);
        }
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::other(format!("injected {what} failure"))));
        }
        Ok(())
    }
}

struct FailingIndex {
    inner: MemoryIndex,
    faults: Arc<Faults>,
}

impl BackingIndex for FailingIndex {
    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn get(&self, key: TimeKey) -> Result<Option<PayloadRef>> {
        Faults::check(&self.faults.index_reads, "index read")?;
        self.inner.get(key)
    }

    fn insert(&mut self, key: TimeKey, payload_ref: PayloadRef) -> Result<Option<PayloadRef>> {
        Faults::check(&self.faults.index_writes, "index write")?;
        self.inner.insert(key, payload_ref)
    }

    fn remove(&mut self, key: TimeKey) -> Result<Option<PayloadRef>> {
        Faults::check(&self.faults.index_writes, "index write")?;
        self.inner.remove(key)
    }

    fn first_in(
        &self,
        range: &KeyRange,
        order: ScanOrder,
    ) -> Result<Option<(TimeKey, PayloadRef)>> {
        Faults::check(&self.faults.index_reads, "index read")?;
        self.inner.first_in(range, order)
    }
}

struct FailingPayloadStore {
    inner: MemoryPayloadStore,
    faults: Arc<Faults>,
}

impl FailingPayloadStore {
    fn stats(&self) -> PayloadStats {
        self.inner.stats()
    }
}

impl PayloadStore for FailingPayloadStore {
    fn put(&self, payload: Payload) -> Result<PayloadRef> {
        Faults::check(&self.faults.puts, "payload put")?;
        self.inner.put(payload)
    }

    fn get(&self, payload_ref: PayloadRef) -> Result<Payload> {
        Faults::check(&self.faults.gets, "payload get")?;
        self.inner.get(payload_ref)
    }

    fn free(&self, payload_ref: PayloadRef) -> Result<()> {
        Faults::check(&self.faults.frees, "payload free")?;
        self.inner.free(payload_ref)
    }
}

type FaultyStore = TimeSeriesStore<FailingIndex, FailingPayloadStore>;

fn faulty_store(keys: &[f64]) -> (FaultyStore, Arc<Faults>) {
    let faults = Arc::new(Faults::default());
    let store = TimeSeriesStore::new(
        RecordSchema::new("weather", &b"temp:f64"[..]),
        FailingIndex {
            inner: MemoryIndex::new(),
            faults: Arc::clone(&faults),
        },
        Arc::new(FailingPayloadStore {
            inner: MemoryPayloadStore::new(),
            faults: Arc::clone(&faults),
        }),
    );
    for &ts in keys {
        store
            .store(ts, Payload::from(format!("v{ts}").into_bytes()))
            .unwrap();
    }
    (store, faults)
}

fn assert_storage_fault<T: std::fmt::Debug>(result: Result<T>) {
    match result {
        Err(err) => assert!(err.is_storage_fault(), "not a storage fault: {err:?}"),
        Ok(value) => panic!("expected a storage fault, got {value:?}"),
    }
}

#[test]
fn test_store_with_failing_put_changes_nothing() {
    let (store, faults) = faulty_store(&[]);
    Faults::arm(&faults.puts);

    assert_storage_fault(store.store(1.0, Payload::from("a")));

    faults.clear();
    assert_eq!(store.size(), 0);
    assert_eq!(store.get(1.0).unwrap(), None);
    assert_eq!(store.payloads().stats().allocated, 0);
}

#[test]
fn test_store_with_failing_index_releases_payload() {
    let (store, faults) = faulty_store(&[]);
    Faults::arm(&faults.index_writes);

    assert_storage_fault(store.store(1.0, Payload::from("a")));

    faults.clear();
    assert_eq!(store.get(1.0).unwrap(), None);
    let stats = store.payloads().stats();
    assert_eq!(stats.allocated, 1);
    assert_eq!(stats.freed, 1);
    assert_eq!(stats.live, 0);

    // The key is still free for a later write.
    store.store(1.0, Payload::from("b")).unwrap();
    assert_eq!(store.get(1.0).unwrap(), Some(Payload::from("b")));
}

#[test]
fn test_update_with_failing_index_keeps_old_value() {
    let (store, faults) = faulty_store(&[1.0]);
    Faults::arm(&faults.index_writes);

    assert_storage_fault(store.update(1.0, Payload::from("new")));

    faults.clear();
    assert_eq!(store.get(1.0).unwrap(), Some(Payload::from("v1")));
    assert_eq!(store.payloads().stats().live, 1);

    // The failed write released the stream lock.
    store.update(1.0, Payload::from("newer")).unwrap();
    assert_eq!(store.get(1.0).unwrap(), Some(Payload::from("newer")));
    assert_eq!(store.payloads().stats().live, 1);
}

#[test]
fn test_update_of_absent_key_with_failing_index_leaks_nothing() {
    let (store, faults) = faulty_store(&[]);
    Faults::arm(&faults.index_writes);

    assert_storage_fault(store.update(5.0, Payload::from("new")));

    faults.clear();
    assert_eq!(store.size(), 0);
    assert_eq!(store.payloads().stats().live, 0);
}

#[test]
fn test_update_with_failing_free_is_applied() {
    let (store, faults) = faulty_store(&[1.0]);
    Faults::arm(&faults.frees);

    assert_storage_fault(store.update(1.0, Payload::from("new")));

    faults.clear();
    assert_eq!(store.get(1.0).unwrap(), Some(Payload::from("new")));
    assert_eq!(store.size(), 1);
    // The superseded payload could not be released.
    assert_eq!(store.payloads().stats().live, 2);
}

#[test]
fn test_remove_with_failing_index_keeps_record() {
    let (store, faults) = faulty_store(&[1.0, 2.0]);
    Faults::arm(&faults.index_writes);

    assert_storage_fault(store.remove(1.0));

    faults.clear();
    assert_eq!(store.size(), 2);
    assert_eq!(store.get(1.0).unwrap(), Some(Payload::from("v1")));
    assert_eq!(store.payloads().stats().freed, 0);
}

#[test]
fn test_remove_with_failing_free_is_applied() {
    let (store, faults) = faulty_store(&[1.0, 2.0]);
    Faults::arm(&faults.frees);

    assert_storage_fault(store.remove(1.0));

    faults.clear();
    assert_eq!(store.get(1.0).unwrap(), None);
    assert_eq!(store.size(), 1);
    assert_eq!(store.payloads().stats().live, 2);
    assert!(!store.remove(1.0).unwrap());
}

#[test]
fn test_remove_matching_stops_at_first_failure() {
    let (store, faults) = faulty_store(&[1.0, 2.0, 3.0]);
    Faults::arm(&faults.frees);

    assert_storage_fault(store.remove_matching(&TimeFilter::all()));

    faults.clear();
    assert_eq!(store.get(1.0).unwrap(), None);
    assert_eq!(store.size(), 2);
    assert_eq!(store.remove_matching(&TimeFilter::all()).unwrap(), 2);
    assert_eq!(store.size(), 0);
}

#[test]
fn test_failing_index_reads_surface_from_queries() {
    let (store, faults) = faulty_store(&[1.0, 2.0, 3.0]);
    Faults::arm(&faults.index_reads);

    assert_storage_fault(store.get(1.0));
    assert_storage_fault(store.count_matching(&TimeFilter::all(), 10));
    assert_storage_fault(store.time_range());
    assert_storage_fault(store.estimated_counts(&[0.0, 2.0, 4.0]));

    let mut cursor = store.scan(&TimeFilter::all(), ScanOrder::Ascending, false);
    assert_storage_fault(cursor.next().unwrap());
    assert!(cursor.next().is_none());

    faults.clear();
    assert_eq!(store.count_matching(&TimeFilter::all(), 10).unwrap(), 3);
}

#[test]
fn test_failing_payload_reads_surface_from_cursor() {
    let (store, faults) = faulty_store(&[1.0, 2.0]);
    Faults::arm(&faults.gets);

    let mut preloaded = store.scan(&TimeFilter::all(), ScanOrder::Descending, true);
    assert_storage_fault(preloaded.next().unwrap());
    assert!(preloaded.next().is_none());

    let mut lazy = store.scan(&TimeFilter::all(), ScanOrder::Ascending, false);
    let mut entry = lazy.next().unwrap().unwrap();
    assert_eq!(entry.key(), 1.0);
    assert_storage_fault(entry.value().map(|v| v.clone()));

    // Nothing was cached, so the read succeeds once the store recovers.
    faults.clear();
    assert_eq!(entry.into_value().unwrap(), Payload::from("v1"));
    assert_eq!(store.size(), 2);
}
