//! Journal-backed durable index.

use crate::error::Result;
use crate::index::{BackingIndex, KeyRange, MemoryIndex, ScanOrder, TimeKey};
use crate::journal::{Journal, JournalConfig, JournalEntry};
use crate::payload::PayloadRef;
use std::path::Path;
use tracing::{debug, warn};

/// Durable [`BackingIndex`]: an in-memory ordered map whose every mutation
/// is journaled and synced before it is applied.
///
/// # Example
///
/// ```rust,ignore
/// use sensorhub_store::index::LogIndex;
/// use sensorhub_store::journal::JournalConfig;
///
/// let index = LogIndex::open("/var/lib/sensorhub/weather/index", JournalConfig::default())?;
/// ```
#[derive(Debug)]
pub struct LogIndex {
    entries: MemoryIndex,
    journal: Journal,
}

impl LogIndex {
    /// Opens the index stored in `dir`, replaying its journal.
    pub fn open(dir: impl AsRef<Path>, config: JournalConfig) -> Result<Self> {
        let (journal, replayed) = Journal::open(dir, config)?;
        let mut entries = MemoryIndex::new();
        for entry in replayed {
            match entry {
                JournalEntry::IndexPut { key, payload_ref } => {
                    entries.insert(key, payload_ref)?;
                }
                JournalEntry::IndexRemove { key } => {
                    entries.remove(key)?;
                }
                other => warn!(
                    "Skipping foreign entry in index journal {}: {:?}",
                    journal.dir().display(),
                    other
                ),
            }
        }
        debug!(
            "Opened index {} with {} keys",
            journal.dir().display(),
            entries.len()
        );
        Ok(Self { entries, journal })
    }

    /// Rewrites the journal to hold one entry per live key.
    pub fn compact(&mut self) -> Result<()> {
        let live: Vec<JournalEntry> = self
            .entries
            .iter()
            .map(|(key, payload_ref)| JournalEntry::IndexPut { key, payload_ref })
            .collect();
        self.journal.compact(&live)
    }

    /// Iterates all live entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (TimeKey, PayloadRef)> + '_ {
        self.entries.iter()
    }
}

impl BackingIndex for LogIndex {
    fn len(&self) -> u64 {
        self.entries.len()
    }

    fn get(&self, key: TimeKey) -> Result<Option<PayloadRef>> {
        self.entries.get(key)
    }

    fn insert(&mut self, key: TimeKey, payload_ref: PayloadRef) -> Result<Option<PayloadRef>> {
        self.journal
            .append(&JournalEntry::IndexPut { key, payload_ref })?;
        self.entries.insert(key, payload_ref)
    }

    fn remove(&mut self, key: TimeKey) -> Result<Option<PayloadRef>> {
        if self.entries.get(key)?.is_none() {
            return Ok(None);
        }
        self.journal.append(&JournalEntry::IndexRemove { key })?;
        self.entries.remove(key)
    }

    fn first_in(
        &self,
        range: &KeyRange,
        order: ScanOrder,
    ) -> Result<Option<(TimeKey, PayloadRef)>> {
        self.entries.first_in(range, order)
    }
}
