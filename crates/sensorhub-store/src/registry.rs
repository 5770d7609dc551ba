//! Storage root holding one record store per sensor stream.

use crate::error::{Result, StoreError};
use crate::index::BackingIndex;
use crate::payload::PayloadStore;
use crate::schema::RecordSchema;
use crate::series::{StoreConfig, TimeSeriesStore};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Registry of record streams sharing one payload store.
///
/// Streams are independent: each has its own index lock, and the registry
/// map is guarded by a separate lock. No stream's index is touched while the
/// registry lock is held, so a slow or blocked stream never stalls lookups
/// of the others.
pub struct SeriesRegistry<I, P> {
    payloads: Arc<P>,
    config: StoreConfig,
    streams: RwLock<BTreeMap<String, Arc<TimeSeriesStore<I, P>>>>,
}

impl<I, P> SeriesRegistry<I, P>
where
    I: BackingIndex,
    P: PayloadStore,
{
    /// Creates an empty registry allocating from `payloads`.
    pub fn new(payloads: Arc<P>) -> Self {
        Self::with_config(payloads, StoreConfig::default())
    }

    /// Creates an empty registry whose streams use `config`.
    pub fn with_config(payloads: Arc<P>, config: StoreConfig) -> Self {
        Self {
            payloads,
            config,
            streams: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers a stream for `schema` over `index`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::StreamExists` if a stream of the same name is
    /// already registered.
    pub fn add_stream(&self, schema: RecordSchema, index: I) -> Result<Arc<TimeSeriesStore<I, P>>> {
        let mut streams = self.streams.write().unwrap_or_else(|err| err.into_inner());
        if streams.contains_key(schema.name()) {
            return Err(StoreError::StreamExists(schema.name().to_string()));
        }

        let name = schema.name().to_string();
        let store = Arc::new(TimeSeriesStore::with_config(
            schema,
            index,
            Arc::clone(&self.payloads),
            self.config.clone(),
        ));
        streams.insert(name.clone(), Arc::clone(&store));
        drop(streams);

        debug!("Registered stream {}", name);
        Ok(store)
    }

    /// Returns the stream named `name`.
    pub fn stream(&self, name: &str) -> Option<Arc<TimeSeriesStore<I, P>>> {
        let streams = self.streams.read().unwrap_or_else(|err| err.into_inner());
        streams.get(name).cloned()
    }

    /// Unregisters the stream named `name` and returns it.
    ///
    /// Records are left in place; whether they are purged is up to the
    /// owner of the returned store.
    pub fn remove_stream(&self, name: &str) -> Option<Arc<TimeSeriesStore<I, P>>> {
        let mut streams = self.streams.write().unwrap_or_else(|err| err.into_inner());
        let removed = streams.remove(name);
        if removed.is_some() {
            debug!("Unregistered stream {}", name);
        }
        removed
    }

    /// Names of all registered streams, in ascending order.
    pub fn stream_names(&self) -> Vec<String> {
        let streams = self.streams.read().unwrap_or_else(|err| err.into_inner());
        streams.keys().cloned().collect()
    }

    /// Number of registered streams.
    pub fn len(&self) -> usize {
        self.streams.read().unwrap_or_else(|err| err.into_inner()).len()
    }

    /// Returns true if no stream is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of record counts over all streams.
    pub fn total_records(&self) -> u64 {
        let streams: Vec<_> = {
            let streams = self.streams.read().unwrap_or_else(|err| err.into_inner());
            streams.values().cloned().collect()
        };
        streams.iter().map(|store| store.size()).sum()
    }

    /// Payload store shared by every stream.
    pub fn payloads(&self) -> &Arc<P> {
        &self.payloads
    }
}

impl<I, P> std::fmt::Debug for SeriesRegistry<I, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let streams = self.streams.read().unwrap_or_else(|err| err.into_inner());
        f.debug_struct("SeriesRegistry")
            .field("streams", &streams.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
