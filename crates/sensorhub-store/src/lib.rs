//! Sensorhub Store - time-indexed record storage for sensor observation streams
//!
//! Each sensor stream is kept in its own [`TimeSeriesStore`]: an ordered
//! index from timestamp to an opaque [`Payload`], guarded by a reader/writer
//! lock. Payload bytes live in a [`PayloadStore`] shared by all streams of a
//! [`SeriesRegistry`].
//!
//! # Components
//!
//! - [`TimeSeriesStore`]: CRUD, time-filtered scans, counts and histograms
//! - [`Cursor`] / [`CachedEntry`]: snapshot-per-step scans with lazy values
//! - [`BackingIndex`]: ordered index seam ([`MemoryIndex`], [`LogIndex`])
//! - [`PayloadStore`]: payload allocator ([`MemoryPayloadStore`], [`LogPayloadStore`])
//! - [`journal`]: checksummed append-only segments behind the durable backends
//!
//! # Example
//!
//! ```rust,ignore
//! use sensorhub_store::{MemoryIndex, MemoryPayloadStore, RecordSchema, SeriesRegistry, TimeFilter};
//! use std::sync::Arc;
//!
//! let registry = SeriesRegistry::new(Arc::new(MemoryPayloadStore::new()));
//! let weather = registry.add_stream(
//!     RecordSchema::new("weather", &b"temp:f64"[..]),
//!     MemoryIndex::new(),
//! )?;
//!
//! weather.store(1_700_000_000.0, "21.5".into())?;
//! let recent = weather.count_matching(&TimeFilter::since(1_699_999_000.0)?, 1000)?;
//! ```

#![deny(missing_docs)]

pub mod error;
pub mod index;
pub mod journal;
pub mod payload;
pub mod registry;
pub mod schema;
pub mod series;

pub use error::{Result, StoreError};
pub use index::{BackingIndex, KeyRange, LogIndex, MemoryIndex, ScanOrder, TimeKey};
pub use journal::{JournalConfig, SyncMode};
pub use payload::{
    LogPayloadStore, MemoryPayloadStore, Payload, PayloadRef, PayloadStats, PayloadStore,
};
pub use registry::SeriesRegistry;
pub use schema::RecordSchema;
pub use series::{
    boundary_filters, uniform_boundaries, CachedEntry, Cursor, DataKey, DataRecord, StoreConfig,
    TimeFilter, TimeSeriesStore, DEFAULT_HISTOGRAM_BIN_CAP,
};
