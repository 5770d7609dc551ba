//! Journal-backed durable payload store.

use crate::error::{Result, StoreError};
use crate::journal::{Journal, JournalConfig, JournalEntry};
use crate::payload::{AllocCounters, Payload, PayloadRef, PayloadStats, PayloadStore};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};

struct Allocator {
    journal: Journal,
    next_ref: u64,
}

/// Durable [`PayloadStore`]: payload allocations and frees are journaled
/// and synced before they take effect.
///
/// One instance is normally shared by every stream of a registry.
pub struct LogPayloadStore {
    payloads: RwLock<HashMap<PayloadRef, Payload>>,
    allocator: Mutex<Allocator>,
    counters: AllocCounters,
}

impl LogPayloadStore {
    /// Opens the payload store in `dir`, replaying its journal.
    pub fn open(dir: impl AsRef<Path>, config: JournalConfig) -> Result<Self> {
        let (journal, replayed) = Journal::open(dir, config)?;
        let mut payloads = HashMap::new();
        let mut max_ref = 0;
        for entry in replayed {
            match entry {
                JournalEntry::PayloadPut {
                    payload_ref,
                    payload,
                } => {
                    max_ref = max_ref.max(payload_ref.id());
                    payloads.insert(payload_ref, payload);
                }
                JournalEntry::PayloadFree { payload_ref } => {
                    payloads.remove(&payload_ref);
                }
                other => warn!(
                    "Skipping foreign entry in payload journal {}: {:?}",
                    journal.dir().display(),
                    other
                ),
            }
        }

        let counters = AllocCounters::default();
        counters.record_put_many(
            payloads.len() as u64,
            payloads.values().map(Payload::len).sum(),
        );
        debug!(
            "Opened payload store {} with {} live payloads",
            journal.dir().display(),
            payloads.len()
        );

        Ok(Self {
            payloads: RwLock::new(payloads),
            allocator: Mutex::new(Allocator {
                journal,
                next_ref: max_ref + 1,
            }),
            counters,
        })
    }

    /// Returns the current allocation counters.
    ///
    /// `allocated` and `freed` count since this process opened the store,
    /// plus the payloads found live on open.
    pub fn stats(&self) -> PayloadStats {
        let payloads = self.payloads.read().unwrap_or_else(|err| err.into_inner());
        self.counters.snapshot(payloads.len())
    }

    /// Rewrites the journal to hold only live payloads.
    pub fn compact(&self) -> Result<()> {
        let mut allocator = self.allocator.lock().unwrap_or_else(|err| err.into_inner());
        let live: Vec<JournalEntry> = {
            let payloads = self.payloads.read().unwrap_or_else(|err| err.into_inner());
            let mut live: Vec<(PayloadRef, Payload)> = payloads
                .iter()
                .map(|(payload_ref, payload)| (*payload_ref, payload.clone()))
                .collect();
            live.sort_by_key(|(payload_ref, _)| *payload_ref);
            live.into_iter()
                .map(|(payload_ref, payload)| JournalEntry::PayloadPut {
                    payload_ref,
                    payload,
                })
                .collect()
        };
        allocator.journal.compact(&live)
    }
}

impl PayloadStore for LogPayloadStore {
    fn put(&self, payload: Payload) -> Result<PayloadRef> {
        let mut allocator = self.allocator.lock().unwrap_or_else(|err| err.into_inner());
        let payload_ref = PayloadRef::new(allocator.next_ref);
        allocator.journal.append(&JournalEntry::PayloadPut {
            payload_ref,
            payload: payload.clone(),
        })?;
        allocator.next_ref += 1;

        let len = payload.len();
        let mut payloads = self.payloads.write().unwrap_or_else(|err| err.into_inner());
        payloads.insert(payload_ref, payload);
        self.counters.record_put(len);
        Ok(payload_ref)
    }

    fn get(&self, payload_ref: PayloadRef) -> Result<Payload> {
        let payloads = self.payloads.read().unwrap_or_else(|err| err.into_inner());
        payloads
            .get(&payload_ref)
            .cloned()
            .ok_or(StoreError::UnknownPayload(payload_ref))
    }

    fn free(&self, payload_ref: PayloadRef) -> Result<()> {
        let mut allocator = self.allocator.lock().unwrap_or_else(|err| err.into_inner());
        {
            let payloads = self.payloads.read().unwrap_or_else(|err| err.into_inner());
            if !payloads.contains_key(&payload_ref) {
                return Err(StoreError::UnknownPayload(payload_ref));
            }
        }
        allocator
            .journal
            .append(&JournalEntry::PayloadFree { payload_ref })?;

        let mut payloads = self.payloads.write().unwrap_or_else(|err| err.into_inner());
        if let Some(payload) = payloads.remove(&payload_ref) {
            self.counters.record_free(payload.len());
        }
        Ok(())
    }
}

impl std::fmt::Debug for LogPayloadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogPayloadStore")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
