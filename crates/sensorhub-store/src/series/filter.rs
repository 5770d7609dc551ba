//! Closed timestamp interval scoping scans, counts and bulk deletes.

use crate::error::{Result, StoreError};
use crate::index::{KeyRange, TimeKey};

/// Inclusive `[min, max]` timestamp interval. Defaults to all time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFilter {
    min: TimeKey,
    max: TimeKey,
}

impl Default for TimeFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl TimeFilter {
    /// Matches every timestamp.
    pub const fn all() -> Self {
        Self {
            min: TimeKey::MIN,
            max: TimeKey::MAX,
        }
    }

    /// Creates the interval `[min, max]`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidArgument` if either bound is NaN or
    /// `min > max`.
    pub fn new(min: f64, max: f64) -> Result<Self> {
        let min = TimeKey::new(min)?;
        let max = TimeKey::new(max)?;
        if min > max {
            return Err(StoreError::invalid(format!(
                "time filter min {} is greater than max {}",
                min.get(),
                max.get()
            )));
        }
        Ok(Self { min, max })
    }

    /// Matches exactly one instant.
    pub fn at(timestamp: f64) -> Result<Self> {
        Self::new(timestamp, timestamp)
    }

    /// Matches `timestamp` and everything after it.
    pub fn since(timestamp: f64) -> Result<Self> {
        Self::new(timestamp, f64::INFINITY)
    }

    /// Matches everything up to and including `timestamp`.
    pub fn until(timestamp: f64) -> Result<Self> {
        Self::new(f64::NEG_INFINITY, timestamp)
    }

    /// Lower bound (inclusive).
    pub fn min(&self) -> f64 {
        self.min.get()
    }

    /// Upper bound (inclusive).
    pub fn max(&self) -> f64 {
        self.max.get()
    }

    /// Returns true if `timestamp` falls within the interval.
    pub fn contains(&self, timestamp: f64) -> bool {
        match TimeKey::new(timestamp) {
            Ok(key) => self.min <= key && key <= self.max,
            Err(_) => false,
        }
    }

    pub(crate) fn key_range(&self) -> KeyRange {
        KeyRange::inclusive(self.min, self.max)
    }
}
