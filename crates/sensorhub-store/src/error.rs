//! Error and Result types for record store operations.

use crate::payload::PayloadRef;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for record store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The error type for record store operations.
///
/// Absence of a key is never an error: lookups return `None` and single-key
/// removals return `false`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A caller-supplied argument is outside the accepted domain
    /// (NaN timestamp, inverted filter, too few histogram boundaries).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An insert-only write targeted a key that already holds a record.
    #[error("Record already exists at timestamp {0}")]
    KeyExists(f64),

    /// A payload reference is not live in the payload store.
    #[error("Unknown payload: {0}")]
    UnknownPayload(PayloadRef),

    /// A record stream with this name is already registered.
    #[error("Record stream already registered: {0}")]
    StreamExists(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid magic bytes in a journal segment or schema file.
    #[error("Invalid magic bytes: {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported journal or schema file format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Checksum does not match the stored value.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Stored CRC32 checksum.
        expected: u32,
        /// Computed CRC32 checksum.
        actual: u32,
    },

    /// A persisted entry could not be decoded.
    #[error("Corrupted entry: {0}")]
    CorruptedEntry(String),

    /// A journal write failed and could not be rolled back; the journal
    /// accepts no further writes until reopened.
    #[error("Journal refuses writes after an unrecoverable failure: {0}")]
    JournalPoisoned(PathBuf),
}

impl StoreError {
    /// Returns true if the error was raised by the backing index or the
    /// payload store rather than by argument validation.
    pub fn is_storage_fault(&self) -> bool {
        !matches!(
            self,
            Self::InvalidArgument(_) | Self::KeyExists(_) | Self::StreamExists(_)
        )
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_fault_classification() {
        assert!(!StoreError::invalid("min > max").is_storage_fault());
        assert!(!StoreError::KeyExists(1.0).is_storage_fault());
        assert!(StoreError::UnknownPayload(PayloadRef::new(7)).is_storage_fault());
        assert!(StoreError::from(io::Error::other("disk")).is_storage_fault());
        assert!(StoreError::JournalPoisoned(PathBuf::from("index")).is_storage_fault());
    }
}
