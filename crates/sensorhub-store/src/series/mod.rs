//! Per-stream record store, scan cursors, time filters and histogram helpers.

pub mod cursor;
pub mod filter;
pub mod histogram;
pub mod store;

pub use cursor::{CachedEntry, Cursor};
pub use filter::TimeFilter;
pub use histogram::{boundary_filters, uniform_boundaries};
pub use store::{DataKey, DataRecord, StoreConfig, TimeSeriesStore, DEFAULT_HISTOGRAM_BIN_CAP};
