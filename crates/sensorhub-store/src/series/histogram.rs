//! Capped per-bin record counts for sampling a stream's time distribution.
//!
//! Each bin is counted independently with
//! [`TimeSeriesStore::count_matching`] and capped, so the result is an
//! approximation: dense bins are under-reported, and since bins are closed
//! intervals a record sitting exactly on an interior boundary is counted in
//! both neighbouring bins.

use crate::error::{Result, StoreError};
use crate::index::BackingIndex;
use crate::payload::PayloadStore;
use crate::series::filter::TimeFilter;
use crate::series::store::TimeSeriesStore;

/// Builds one filter per adjacent pair of `boundaries`.
///
/// # Errors
///
/// Returns `StoreError::InvalidArgument` if fewer than two boundaries are
/// given, or if any boundary is NaN or smaller than its predecessor.
pub fn boundary_filters(boundaries: &[f64]) -> Result<Vec<TimeFilter>> {
    if boundaries.len() < 2 {
        return Err(StoreError::invalid(format!(
            "histogram needs at least 2 boundaries, got {}",
            boundaries.len()
        )));
    }
    boundaries
        .windows(2)
        .map(|pair| TimeFilter::new(pair[0], pair[1]))
        .collect()
}

/// Splits `[start, end]` into `bins` equal-width bins and returns the
/// `bins + 1` boundaries.
pub fn uniform_boundaries(start: f64, end: f64, bins: usize) -> Result<Vec<f64>> {
    if bins == 0 {
        return Err(StoreError::invalid("histogram needs at least one bin"));
    }
    if !start.is_finite() || !end.is_finite() || start > end {
        return Err(StoreError::invalid(format!(
            "cannot split [{start}, {end}] into bins"
        )));
    }
    let width = (end - start) / bins as f64;
    let mut boundaries: Vec<f64> = (0..bins).map(|i| start + width * i as f64).collect();
    // Exact upper edge, free of accumulated rounding.
    boundaries.push(end);
    Ok(boundaries)
}

impl<I, P> TimeSeriesStore<I, P>
where
    I: BackingIndex,
    P: PayloadStore,
{
    /// Returns one capped record count per adjacent pair of `boundaries`,
    /// using the configured `histogram_bin_cap`.
    pub fn estimated_counts(&self, boundaries: &[f64]) -> Result<Vec<u64>> {
        self.estimated_counts_capped(boundaries, self.config().histogram_bin_cap)
    }

    /// Same as [`estimated_counts`](Self::estimated_counts) with an explicit
    /// per-bin cap.
    pub fn estimated_counts_capped(&self, boundaries: &[f64], cap: u64) -> Result<Vec<u64>> {
        boundary_filters(boundaries)?
            .iter()
            .map(|filter| self.count_matching(filter, cap))
            .collect()
    }
}
