//! Lock-per-step range cursor and the entry snapshots it yields.
//!
//! A [`Cursor`] never holds the index lock between calls to `next()`. Each
//! step takes the shared lock, seeks the first entry of the remaining range,
//! copies what it needs into a [`CachedEntry`] and releases the lock before
//! handing the entry back. Caller-side processing therefore never blocks
//! writers, and a caller may write to the same store while it iterates.
//!
//! The flip side is that a scan is not a consistent snapshot: entries
//! inserted or removed ahead of the cursor may or may not be observed.

use crate::error::Result;
use crate::index::{BackingIndex, KeyRange, ScanOrder};
use crate::payload::{Payload, PayloadRef, PayloadStore};
use std::fmt;
use std::sync::RwLock;

/// Snapshot of one index entry taken by a [`Cursor`].
///
/// The key is always captured. The value is captured only when the scan was
/// started with `preload_value`; otherwise it is read from the payload store
/// on first access, without taking the index lock again.
pub struct CachedEntry<'a, P: ?Sized> {
    key: f64,
    payload_ref: PayloadRef,
    value: Option<Payload>,
    payloads: &'a P,
}

impl<'a, P: PayloadStore + ?Sized> CachedEntry<'a, P> {
    pub(crate) fn new(key: f64, payload_ref: PayloadRef, payloads: &'a P) -> Self {
        Self {
            key,
            payload_ref,
            value: None,
            payloads,
        }
    }

    pub(crate) fn preload(mut self) -> Result<Self> {
        self.value = Some(self.payloads.get(self.payload_ref)?);
        Ok(self)
    }

    /// Timestamp of the record.
    pub fn key(&self) -> f64 {
        self.key
    }

    /// Payload reference the index held when the entry was fetched.
    pub fn payload_ref(&self) -> PayloadRef {
        self.payload_ref
    }

    /// Returns true if the value has been materialized.
    pub fn is_loaded(&self) -> bool {
        self.value.is_some()
    }

    /// Returns the value if it has already been materialized.
    pub fn cached_value(&self) -> Option<&Payload> {
        self.value.as_ref()
    }

    /// Returns the value, reading it from the payload store on first use.
    ///
    /// # Errors
    ///
    /// A lazy read of a payload that a concurrent `update` or `remove` has
    /// since freed fails with `StoreError::UnknownPayload`.
    pub fn value(&mut self) -> Result<&Payload> {
        let value = match self.value.take() {
            Some(value) => value,
            None => self.payloads.get(self.payload_ref)?,
        };
        Ok(self.value.insert(value))
    }

    /// Consumes the entry and returns its value.
    pub fn into_value(self) -> Result<Payload> {
        match self.value {
            Some(value) => Ok(value),
            None => self.payloads.get(self.payload_ref),
        }
    }
}

impl<P: ?Sized> fmt::Debug for CachedEntry<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedEntry")
            .field("key", &self.key)
            .field("payload_ref", &self.payload_ref)
            .field("value", &self.value)
            .finish()
    }
}

/// Forward-only sequence of [`CachedEntry`] over a key range.
///
/// Produced by [`TimeSeriesStore::scan`](crate::series::TimeSeriesStore::scan).
/// After an error is yielded the cursor is exhausted.
pub struct Cursor<'a, I, P: ?Sized> {
    index: &'a RwLock<I>,
    payloads: &'a P,
    range: KeyRange,
    order: ScanOrder,
    preload_value: bool,
    done: bool,
}

impl<'a, I, P> Cursor<'a, I, P>
where
    I: BackingIndex,
    P: PayloadStore + ?Sized,
{
    pub(crate) fn new(
        index: &'a RwLock<I>,
        payloads: &'a P,
        range: KeyRange,
        order: ScanOrder,
        preload_value: bool,
    ) -> Self {
        Self {
            index,
            payloads,
            range,
            order,
            preload_value,
            done: range.is_empty(),
        }
    }

    /// Scan direction.
    pub fn order(&self) -> ScanOrder {
        self.order
    }

    /// Returns true if values are read while the entry is fetched.
    pub fn preloads_value(&self) -> bool {
        self.preload_value
    }

    fn fetch(&mut self) -> Result<Option<CachedEntry<'a, P>>> {
        let index = self.index.read().unwrap_or_else(|err| err.into_inner());
        let Some((key, payload_ref)) = index.first_in(&self.range, self.order)? else {
            return Ok(None);
        };
        self.range.resume_after(key, self.order);

        let entry = CachedEntry::new(key.get(), payload_ref, self.payloads);
        if self.preload_value {
            // Still under the shared lock: no writer can free the payload yet.
            entry.preload().map(Some)
        } else {
            Ok(Some(entry))
        }
    }
}

impl<'a, I, P> Iterator for Cursor<'a, I, P>
where
    I: BackingIndex,
    P: PayloadStore + ?Sized,
{
    type Item = Result<CachedEntry<'a, P>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.fetch() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl<I, P: ?Sized> fmt::Debug for Cursor<'_, I, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("range", &self.range)
            .field("order", &self.order)
            .field("preload_value", &self.preload_value)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{MemoryIndex, TimeKey};
    use crate::payload::MemoryPayloadStore;
    use crate::StoreError;

    fn fixture(keys: &[f64]) -> (RwLock<MemoryIndex>, MemoryPayloadStore) {
        let payloads = MemoryPayloadStore::new();
        let mut index = MemoryIndex::new();
        for &ts in keys {
            let r = payloads.put(Payload::from(format!("v{ts}").into_bytes())).unwrap();
            index.insert(TimeKey::new(ts).unwrap(), r).unwrap();
        }
        (RwLock::new(index), payloads)
    }

    fn all() -> KeyRange {
        KeyRange::inclusive(TimeKey::MIN, TimeKey::MAX)
    }

    #[test]
    fn test_preloaded_entries_carry_values() {
        let (index, payloads) = fixture(&[1.0, 2.0]);
        let entries: Vec<_> = Cursor::new(&index, &payloads, all(), ScanOrder::Ascending, true)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.is_loaded()));
        assert_eq!(entries[0].cached_value().unwrap().as_bytes(), b"v1");
    }

    #[test]
    fn test_lazy_value_is_read_on_demand() {
        let (index, payloads) = fixture(&[1.0]);
        let mut cursor = Cursor::new(&index, &payloads, all(), ScanOrder::Ascending, false);
        let mut entry = cursor.next().unwrap().unwrap();

        assert!(!entry.is_loaded());
        assert_eq!(entry.value().unwrap().as_bytes(), b"v1");
        assert!(entry.is_loaded());
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_lazy_value_after_free_reports_unknown_payload() {
        let (index, payloads) = fixture(&[1.0]);
        let entry = Cursor::new(&index, &payloads, all(), ScanOrder::Ascending, false)
            .next()
            .unwrap()
            .unwrap();

        payloads.free(entry.payload_ref()).unwrap();
        assert!(matches!(
            entry.into_value(),
            Err(StoreError::UnknownPayload(_))
        ));
    }

    #[test]
    fn test_descending_order() {
        let (index, payloads) = fixture(&[1.0, 2.0, 3.0]);
        let keys: Vec<f64> = Cursor::new(&index, &payloads, all(), ScanOrder::Descending, false)
            .map(|e| e.unwrap().key())
            .collect();
        assert_eq!(keys, vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_lock_is_released_between_steps() {
        let (index, payloads) = fixture(&[1.0, 2.0]);
        let mut cursor = Cursor::new(&index, &payloads, all(), ScanOrder::Ascending, false);
        cursor.next().unwrap().unwrap();

        // A writer can get in while the cursor is parked.
        assert!(index.try_write().is_ok());
    }
}
