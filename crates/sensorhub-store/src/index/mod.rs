//! Ordered timestamp index backing a record stream.
//!
//! A [`BackingIndex`] maps [`TimeKey`]s to [`PayloadRef`]s and can seek the
//! first entry of a [`KeyRange`] in either direction. It carries no locking
//! of its own: the owning store wraps it in a reader/writer lock, so `&self`
//! methods run under the shared lock and `&mut self` methods under the
//! exclusive lock.

pub mod log;

use crate::error::{Result, StoreError};
use crate::payload::PayloadRef;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;

pub use self::log::LogIndex;

/// Record timestamp usable as an index key.
///
/// Ordered by IEEE-754 total order. NaN is rejected at construction and
/// `-0.0` is folded into `0.0`, so equal instants always map to one key.
#[derive(Debug, Clone, Copy)]
pub struct TimeKey(f64);

impl TimeKey {
    /// Smallest possible key.
    pub const MIN: TimeKey = TimeKey(f64::NEG_INFINITY);
    /// Largest possible key.
    pub const MAX: TimeKey = TimeKey(f64::INFINITY);

    /// Creates a key from a timestamp.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidArgument` if `timestamp` is NaN.
    pub fn new(timestamp: f64) -> Result<Self> {
        if timestamp.is_nan() {
            return Err(StoreError::invalid("timestamp must not be NaN"));
        }
        // -0.0 + 0.0 == +0.0
        Ok(Self(timestamp + 0.0))
    }

    /// Returns the timestamp value.
    pub fn get(self) -> f64 {
        self.0
    }
}

impl PartialEq for TimeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimeKey {}

impl PartialOrd for TimeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Direction of a range scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanOrder {
    /// Oldest record first.
    #[default]
    Ascending,
    /// Newest record first.
    Descending,
}

/// Key interval with independent lower and upper bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    /// Lower bound.
    pub lower: Bound<TimeKey>,
    /// Upper bound.
    pub upper: Bound<TimeKey>,
}

impl KeyRange {
    /// Creates the closed interval `[min, max]`.
    pub fn inclusive(min: TimeKey, max: TimeKey) -> Self {
        Self {
            lower: Bound::Included(min),
            upper: Bound::Included(max),
        }
    }

    /// Returns true if no key can fall in the range.
    pub fn is_empty(&self) -> bool {
        match (self.lower, self.upper) {
            (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (Bound::Included(lo), Bound::Excluded(hi))
            | (Bound::Excluded(lo), Bound::Included(hi))
            | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi,
        }
    }

    /// Shrinks the range so that it resumes strictly after `key` when
    /// walking in `order`.
    pub fn resume_after(&mut self, key: TimeKey, order: ScanOrder) {
        match order {
            ScanOrder::Ascending => self.lower = Bound::Excluded(key),
            ScanOrder::Descending => self.upper = Bound::Excluded(key),
        }
    }
}

/// Ordered key to payload-reference structure owned by one record stream.
pub trait BackingIndex: Send + Sync {
    /// Returns the number of keys.
    fn len(&self) -> u64;

    /// Returns true if the index holds no keys.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up a single key.
    fn get(&self, key: TimeKey) -> Result<Option<PayloadRef>>;

    /// Inserts or replaces the entry at `key`, returning the superseded
    /// reference if there was one.
    fn insert(&mut self, key: TimeKey, payload_ref: PayloadRef) -> Result<Option<PayloadRef>>;

    /// Removes the entry at `key`, returning its reference if there was one.
    fn remove(&mut self, key: TimeKey) -> Result<Option<PayloadRef>>;

    /// Returns the first entry of `range` in `order`.
    fn first_in(
        &self,
        range: &KeyRange,
        order: ScanOrder,
    ) -> Result<Option<(TimeKey, PayloadRef)>>;
}

/// In-memory backing index.
#[derive(Debug, Default, Clone)]
pub struct MemoryIndex {
    entries: BTreeMap<TimeKey, PayloadRef>,
}

impl MemoryIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterates all entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (TimeKey, PayloadRef)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }
}

impl BackingIndex for MemoryIndex {
    fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    fn get(&self, key: TimeKey) -> Result<Option<PayloadRef>> {
        Ok(self.entries.get(&key).copied())
    }

    fn insert(&mut self, key: TimeKey, payload_ref: PayloadRef) -> Result<Option<PayloadRef>> {
        Ok(self.entries.insert(key, payload_ref))
    }

    fn remove(&mut self, key: TimeKey) -> Result<Option<PayloadRef>> {
        Ok(self.entries.remove(&key))
    }

    fn first_in(
        &self,
        range: &KeyRange,
        order: ScanOrder,
    ) -> Result<Option<(TimeKey, PayloadRef)>> {
        // BTreeMap::range panics on inverted or empty-excluded bounds.
        if range.is_empty() {
            return Ok(None);
        }
        let mut entries = self.entries.range((range.lower, range.upper));
        let entry = match order {
            ScanOrder::Ascending => entries.next(),
            ScanOrder::Descending => entries.next_back(),
        };
        Ok(entry.map(|(k, v)| (*k, *v)))
    }
}
