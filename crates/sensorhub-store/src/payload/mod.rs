//! Record payloads and the allocator that owns their storage.
//!
//! The store never inspects a [`Payload`]; it hands it to a [`PayloadStore`]
//! and keeps only the returned [`PayloadRef`] in the index. Payloads that
//! are superseded or removed are released with [`PayloadStore::free`].

pub mod log;

use crate::error::{Result, StoreError};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

pub use self::log::LogPayloadStore;

/// Opaque serialized record value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Payload(Bytes);

impl Payload {
    /// Wraps raw record bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Returns the payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the payload length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the payload has no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the payload and returns the underlying buffer.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }
}

impl From<&'static str> for Payload {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Identity of one allocated payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PayloadRef(u64);

impl PayloadRef {
    /// Creates a reference from its raw id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PayloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payload#{}", self.0)
    }
}

/// Allocator for record payloads.
///
/// Every payload handed out by [`put`](PayloadStore::put) must be released
/// exactly once with [`free`](PayloadStore::free) once no key refers to it.
pub trait PayloadStore: Send + Sync {
    /// Stores a payload and returns its new identity.
    fn put(&self, payload: Payload) -> Result<PayloadRef>;

    /// Reads a live payload.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownPayload` if the reference was never
    /// allocated or has already been freed.
    fn get(&self, payload_ref: PayloadRef) -> Result<Payload>;

    /// Reclaims a payload's storage.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownPayload` if the reference is not live, so
    /// a double free is reported instead of ignored.
    fn free(&self, payload_ref: PayloadRef) -> Result<()>;
}

/// Point-in-time allocation counters of a payload store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadStats {
    /// Payloads currently allocated.
    pub live: u64,
    /// Payloads allocated since creation.
    pub allocated: u64,
    /// Payloads freed since creation.
    pub freed: u64,
    /// Bytes held by live payloads.
    pub live_bytes: usize,
}

#[derive(Debug, Default)]
pub(crate) struct AllocCounters {
    allocated: AtomicU64,
    freed: AtomicU64,
    live_bytes: AtomicUsize,
}

impl AllocCounters {
    pub(crate) fn record_put(&self, bytes: usize) {
        self.allocated.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_put_many(&self, count: u64, bytes: usize) {
        self.allocated.fetch_add(count, Ordering::Relaxed);
        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_free(&self, bytes: usize) {
        self.freed.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, live: usize) -> PayloadStats {
        PayloadStats {
            live: live as u64,
            allocated: self.allocated.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
        }
    }
}

/// In-process payload store.
#[derive(Debug)]
pub struct MemoryPayloadStore {
    payloads: RwLock<HashMap<PayloadRef, Payload>>,
    next_ref: AtomicU64,
    counters: AllocCounters,
}

impl Default for MemoryPayloadStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPayloadStore {
    /// Creates an empty payload store.
    pub fn new() -> Self {
        Self {
            payloads: RwLock::new(HashMap::new()),
            next_ref: AtomicU64::new(1),
            counters: AllocCounters::default(),
        }
    }

    /// Returns the current allocation counters.
    pub fn stats(&self) -> PayloadStats {
        let payloads = self.payloads.read().unwrap_or_else(|err| err.into_inner());
        self.counters.snapshot(payloads.len())
    }

    /// Returns true if the reference is currently allocated.
    pub fn contains(&self, payload_ref: PayloadRef) -> bool {
        let payloads = self.payloads.read().unwrap_or_else(|err| err.into_inner());
        payloads.contains_key(&payload_ref)
    }
}

impl PayloadStore for MemoryPayloadStore {
    fn put(&self, payload: Payload) -> Result<PayloadRef> {
        let payload_ref = PayloadRef::new(self.next_ref.fetch_add(1, Ordering::Relaxed));
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
        let mut payloads = self.payloads.write().unwrap_or_else(|err| err.into_inner());
        let payload = payloads
            .remove(&payload_ref)
            .ok_or(StoreError::UnknownPayload(payload_ref))?;
        self.counters.record_free(payload.len());
        Ok(())
    }
}
