//! TimeSeriesStore - lock-guarded record store for a single record stream.

use crate::error::{Result, StoreError};
use crate::index::{BackingIndex, ScanOrder, TimeKey};
use crate::payload::{Payload, PayloadRef, PayloadStore};
use crate::schema::RecordSchema;
use crate::series::cursor::Cursor;
use crate::series::filter::TimeFilter;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Default per-bin cap used by [`TimeSeriesStore::estimated_counts`].
pub const DEFAULT_HISTOGRAM_BIN_CAP: u64 = 1000;

/// Configuration for a record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Maximum count reported for one histogram bin.
    ///
    /// Bounds the cost of [`TimeSeriesStore::estimated_counts`]; denser bins
    /// are under-reported. Default: 1000.
    pub histogram_bin_cap: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            histogram_bin_cap: DEFAULT_HISTOGRAM_BIN_CAP,
        }
    }
}

impl StoreConfig {
    /// Sets a custom histogram bin cap.
    pub fn with_histogram_bin_cap(mut self, cap: u64) -> Self {
        self.histogram_bin_cap = cap;
        self
    }
}

/// Identifies one record of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DataKey {
    /// Name of the record stream.
    pub record_type: String,
    /// Record timestamp.
    pub timestamp: f64,
}

/// A record together with its key.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    /// Record key.
    pub key: DataKey,
    /// Record payload.
    pub value: Payload,
}

/// Time-indexed record store for one named record stream.
///
/// Wraps one [`BackingIndex`] behind a reader/writer lock. Readers take the
/// shared lock only for the span of one read; writers hold the exclusive
/// lock for the whole operation, including payload reclamation. Guards are
/// scoped, so the lock is released on every exit path including errors.
///
/// Payload storage is owned through the [`PayloadStore`]: superseded and
/// removed payloads are freed exactly once, under the exclusive lock.
pub struct TimeSeriesStore<I, P> {
    schema: RecordSchema,
    index: RwLock<I>,
    payloads: Arc<P>,
    config: StoreConfig,
}

impl<I, P> TimeSeriesStore<I, P>
where
    I: BackingIndex,
    P: PayloadStore,
{
    /// Creates a store for `schema` over `index`, allocating payloads from
    /// `payloads`.
    pub fn new(schema: RecordSchema, index: I, payloads: Arc<P>) -> Self {
        Self::with_config(schema, index, payloads, StoreConfig::default())
    }

    /// Creates a store with a custom configuration.
    pub fn with_config(
        schema: RecordSchema,
        index: I,
        payloads: Arc<P>,
        config: StoreConfig,
    ) -> Self {
        Self {
            schema,
            index: RwLock::new(index),
            payloads,
            config,
        }
    }

    /// Name of the record stream.
    pub fn name(&self) -> &str {
        self.schema.name()
    }

    /// Schema descriptor supplied at construction.
    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Payload store backing this stream.
    pub fn payloads(&self) -> &Arc<P> {
        &self.payloads
    }

    fn shared(&self) -> RwLockReadGuard<'_, I> {
        self.index.read().unwrap_or_else(|err| err.into_inner())
    }

    fn exclusive(&self) -> RwLockWriteGuard<'_, I> {
        self.index.write().unwrap_or_else(|err| err.into_inner())
    }

    /// Returns the number of records.
    pub fn size(&self) -> u64 {
        self.shared().len()
    }

    /// Looks up the record at `key`.
    ///
    /// Returns `Ok(None)` if no record exists at that timestamp.
    pub fn get(&self, key: f64) -> Result<Option<Payload>> {
        let key = TimeKey::new(key)?;
        let index = self.shared();
        match index.get(key)? {
            Some(payload_ref) => self.payloads.get(payload_ref).map(Some),
            None => Ok(None),
        }
    }

    /// Inserts a new record.
    ///
    /// This is insert-only: replacing an existing record goes through
    /// [`update`](Self::update), which reclaims the superseded payload.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::KeyExists` if a record already exists at `key`.
    /// Nothing is allocated in that case.
    pub fn store(&self, key: f64, value: Payload) -> Result<()> {
        let key = TimeKey::new(key)?;
        let mut index = self.exclusive();
        if index.get(key)?.is_some() {
            return Err(StoreError::KeyExists(key.get()));
        }
        let payload_ref = self.payloads.put(value)?;
        self.insert_or_rollback(&mut index, key, payload_ref)?;
        Ok(())
    }

    /// Inserts or replaces the record at `key`.
    ///
    /// When a previous payload existed and differs from the new one, it is
    /// freed after the index has been updated.
    ///
    /// # Errors
    ///
    /// If the payload store or the index rejects the write, nothing changes
    /// and the new payload is released again. If freeing the superseded
    /// payload fails, the error is returned even though the update has
    /// already been applied: `key` maps to the new value, and the old
    /// payload stays allocated until it is freed or compacted away.
    pub fn update(&self, key: f64, value: Payload) -> Result<()> {
        let key = TimeKey::new(key)?;
        let mut index = self.exclusive();
        let payload_ref = self.payloads.put(value)?;
        let previous = self.insert_or_rollback(&mut index, key, payload_ref)?;
        if let Some(old) = previous {
            if old != payload_ref {
                self.payloads.free(old)?;
            }
        }
        Ok(())
    }

    /// Puts `payload_ref` into the index, freeing it again if the index
    /// rejects the write so a fault never leaks the new payload.
    fn insert_or_rollback(
        &self,
        index: &mut I,
        key: TimeKey,
        payload_ref: PayloadRef,
    ) -> Result<Option<PayloadRef>> {
        match index.insert(key, payload_ref) {
            Ok(previous) => Ok(previous),
            Err(err) => {
                if let Err(free_err) = self.payloads.free(payload_ref) {
                    warn!(
                        "Failed to release {} after index write failure: {:?}",
                        payload_ref, free_err
                    );
                }
                Err(err)
            }
        }
    }

    /// Removes the record at `key` and frees its payload.
    ///
    /// Returns `Ok(false)` if there was no record at that timestamp.
    ///
    /// # Errors
    ///
    /// If the index rejects the removal, the record is untouched. If freeing
    /// the payload fails, the error is returned even though the key has
    /// already been removed from the index; the payload stays allocated
    /// until it is freed or compacted away.
    pub fn remove(&self, key: f64) -> Result<bool> {
        let key = TimeKey::new(key)?;
        let mut index = self.exclusive();
        match index.remove(key)? {
            Some(old) => {
                self.payloads.free(old)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes every record within `filter`, freeing each payload.
    ///
    /// The exclusive lock is held for the whole scan-and-delete, so large
    /// deletes block all other access to this stream until they finish.
    ///
    /// Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Stops at the first index or payload failure. Records removed before
    /// the failure stay removed.
    pub fn remove_matching(&self, filter: &TimeFilter) -> Result<u64> {
        let mut index = self.exclusive();
        let mut range = filter.key_range();
        let mut removed = 0;

        while let Some((key, _)) = index.first_in(&range, ScanOrder::Ascending)? {
            range.resume_after(key, ScanOrder::Ascending);
            if let Some(old) = index.remove(key)? {
                self.payloads.free(old)?;
                removed += 1;
            }
        }

        debug!(
            "Removed {} records from stream {} in [{}, {}]",
            removed,
            self.name(),
            filter.min(),
            filter.max()
        );
        Ok(removed)
    }

    /// Starts a scan over `filter` in `order`.
    ///
    /// With `preload_value` each value is read while the entry is fetched;
    /// otherwise values are read on first access. The cursor takes the
    /// shared lock once per step and holds no lock between steps.
    pub fn scan(
        &self,
        filter: &TimeFilter,
        order: ScanOrder,
        preload_value: bool,
    ) -> Cursor<'_, I, P> {
        Cursor::new(
            &self.index,
            self.payloads.as_ref(),
            filter.key_range(),
            order,
            preload_value,
        )
    }

    /// Iterates the records within `filter` in ascending time order.
    pub fn records<'a>(
        &'a self,
        filter: &TimeFilter,
    ) -> impl Iterator<Item = Result<DataRecord>> + 'a {
        self.scan(filter, ScanOrder::Ascending, true).map(move |entry| {
            let entry = entry?;
            let key = DataKey {
                record_type: self.name().to_string(),
                timestamp: entry.key(),
            };
            Ok(DataRecord {
                key,
                value: entry.into_value()?,
            })
        })
    }

    /// Iterates the payloads within `filter` in ascending time order.
    pub fn values<'a>(&'a self, filter: &TimeFilter) -> impl Iterator<Item = Result<Payload>> + 'a {
        self.scan(filter, ScanOrder::Ascending, true)
            .map(|entry| entry.and_then(|e| e.into_value()))
    }

    /// Counts records within `filter`, stopping once `max_count` is reached.
    ///
    /// Returns `min(matching, max_count)`. Values are never read.
    pub fn count_matching(&self, filter: &TimeFilter, max_count: u64) -> Result<u64> {
        let mut cursor = self.scan(filter, ScanOrder::Ascending, false);
        let mut count = 0;
        while count < max_count {
            match cursor.next() {
                Some(entry) => {
                    entry?;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    /// Returns the `(oldest, newest)` record timestamps, or `(NaN, NaN)` if
    /// the store is empty.
    pub fn time_range(&self) -> Result<(f64, f64)> {
        let index = self.shared();
        let all = TimeFilter::all().key_range();
        let Some((first, _)) = index.first_in(&all, ScanOrder::Ascending)? else {
            return Ok((f64::NAN, f64::NAN));
        };
        let last = index
            .first_in(&all, ScanOrder::Descending)?
            .map_or(first, |(key, _)| key);
        Ok((first.get(), last.get()))
    }

    /// Runs `f` with exclusive access to the backing index.
    ///
    /// Intended for index maintenance such as journal compaction.
    pub fn with_index_exclusive<R>(&self, f: impl FnOnce(&mut I) -> R) -> R {
        let mut index = self.exclusive();
        f(&mut *index)
    }
}

impl<I, P> std::fmt::Debug for TimeSeriesStore<I, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeriesStore")
            .field("schema", &self.schema)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
