//! Append-only journal backing the durable index and payload store.
//!
//! Every mutation of a [`LogIndex`](crate::index::LogIndex) or
//! [`LogPayloadStore`](crate::payload::LogPayloadStore) is appended here and
//! synced before the write call returns. On open, all segments are replayed
//! in order to rebuild the in-memory state.
//!
//! # Segment Layout
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  Segment Header (22 bytes)                     │
//! │  - Magic: "TSJL" (4 bytes)                     │
//! │  - Version: u16 (2 bytes)                      │
//! │  - Segment ID: u64 (8 bytes)                   │
//! │  - Created At: i64 nanos (8 bytes)             │
//! ├───────────────────────────────────────────────┤
//! │  Entries (repeated)                            │
//! │  - Length: u32 | CRC32: u32 | Data             │
//! │  - Data: type u8 | sequence u64 | body         │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! A crash can leave a torn entry at the tail of a segment: a frame cut
//! short by the end of the file, a final frame whose checksum fails, or a
//! zero-filled remainder. Replay drops such a tail with a warning. A damaged
//! frame that is followed by more data is corruption and fails the open.

use crate::error::{Result, StoreError};
use crate::index::TimeKey;
use crate::payload::{Payload, PayloadRef};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default maximum segment size (64 MB).
pub const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024 * 1024;

/// Largest entry accepted on replay; guards allocation on a corrupt length.
pub const MAX_ENTRY_SIZE: usize = 256 * 1024 * 1024;

/// Journal segment file extension.
const SEGMENT_EXTENSION: &str = "jrnl";

/// Journal segment file prefix.
const SEGMENT_PREFIX: &str = "segment";

const JOURNAL_MAGIC: [u8; 4] = *b"TSJL";

const JOURNAL_VERSION: u16 = 1;

/// Fixed prefix of every entry's data: type (1) + sequence (8).
const ENTRY_PREFIX_SIZE: usize = 9;

/// Frame header preceding entry data: length (4) + CRC32 (4).
const FRAME_HEADER_SIZE: usize = 8;

/// Sync mode for journal durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Fsync after every append (default, highest durability).
    #[default]
    Fsync,
    /// Use fdatasync (skip metadata update, faster).
    Fdatasync,
    /// Flush to the OS only (fastest, lowest durability - for testing only).
    None,
}

/// Configuration for journal behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalConfig {
    /// Maximum size of a single segment file before rotation.
    pub segment_size: usize,
    /// Sync mode for durability guarantees.
    pub sync_mode: SyncMode,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            sync_mode: SyncMode::default(),
        }
    }
}

impl JournalConfig {
    /// Sets a custom segment size.
    pub fn with_segment_size(mut self, segment_size: usize) -> Self {
        self.segment_size = segment_size;
        self
    }

    /// Sets a custom sync mode.
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum EntryType {
    IndexPut = 1,
    IndexRemove = 2,
    PayloadPut = 3,
    PayloadFree = 4,
}

impl EntryType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::IndexPut),
            2 => Some(Self::IndexRemove),
            3 => Some(Self::PayloadPut),
            4 => Some(Self::PayloadFree),
            _ => None,
        }
    }
}

/// A single journaled mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalEntry {
    /// Index entry inserted or replaced.
    IndexPut {
        /// Record timestamp.
        key: TimeKey,
        /// Payload the key points to.
        payload_ref: PayloadRef,
    },
    /// Index entry removed.
    IndexRemove {
        /// Record timestamp.
        key: TimeKey,
    },
    /// Payload allocated.
    PayloadPut {
        /// Identity assigned to the payload.
        payload_ref: PayloadRef,
        /// Payload bytes.
        payload: Payload,
    },
    /// Payload freed.
    PayloadFree {
        /// Identity of the freed payload.
        payload_ref: PayloadRef,
    },
}

impl JournalEntry {
    fn entry_type(&self) -> EntryType {
        match self {
            Self::IndexPut { .. } => EntryType::IndexPut,
            Self::IndexRemove { .. } => EntryType::IndexRemove,
            Self::PayloadPut { .. } => EntryType::PayloadPut,
            Self::PayloadFree { .. } => EntryType::PayloadFree,
        }
    }

    /// Serializes the entry data (without the length/CRC frame).
    fn to_bytes(&self, sequence: u64) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(ENTRY_PREFIX_SIZE + 16);
        bytes.push(self.entry_type() as u8);
        bytes.extend_from_slice(&sequence.to_le_bytes());
        match self {
            Self::IndexPut { key, payload_ref } => {
                bytes.extend_from_slice(&key.get().to_le_bytes());
                bytes.extend_from_slice(&payload_ref.id().to_le_bytes());
            }
            Self::IndexRemove { key } => {
                bytes.extend_from_slice(&key.get().to_le_bytes());
            }
            Self::PayloadPut {
                payload_ref,
                payload,
            } => {
                bytes.extend_from_slice(&payload_ref.id().to_le_bytes());
                bytes.extend_from_slice(payload.as_bytes());
            }
            Self::PayloadFree { payload_ref } => {
                bytes.extend_from_slice(&payload_ref.id().to_le_bytes());
            }
        }
        bytes
    }

    /// Deserializes entry data, returning the sequence number and the entry.
    fn from_bytes(bytes: &[u8]) -> Result<(u64, Self)> {
        if bytes.len() < ENTRY_PREFIX_SIZE {
            return Err(StoreError::CorruptedEntry(format!(
                "journal entry too short: {} bytes",
                bytes.len()
            )));
        }
        let entry_type = EntryType::from_u8(bytes[0]).ok_or_else(|| {
            StoreError::CorruptedEntry(format!("unknown journal entry type {}", bytes[0]))
        })?;
        let sequence = read_u64(bytes, 1)?;
        let body = &bytes[ENTRY_PREFIX_SIZE..];

        let entry = match entry_type {
            EntryType::IndexPut => {
                expect_len(body, 16)?;
                Self::IndexPut {
                    key: TimeKey::new(f64::from_bits(read_u64(body, 0)?))?,
                    payload_ref: PayloadRef::new(read_u64(body, 8)?),
                }
            }
            EntryType::IndexRemove => {
                expect_len(body, 8)?;
                Self::IndexRemove {
                    key: TimeKey::new(f64::from_bits(read_u64(body, 0)?))?,
                }
            }
            EntryType::PayloadPut => Self::PayloadPut {
                payload_ref: PayloadRef::new(read_u64(body, 0)?),
                payload: Payload::from(body[8..].to_vec()),
            },
            EntryType::PayloadFree => {
                expect_len(body, 8)?;
                Self::PayloadFree {
                    payload_ref: PayloadRef::new(read_u64(body, 0)?),
                }
            }
        };
        Ok((sequence, entry))
    }
}

fn read_u64(bytes: &[u8], pos: usize) -> Result<u64> {
    bytes
        .get(pos..pos + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| StoreError::CorruptedEntry("journal entry truncated".to_string()))
}

fn expect_len(body: &[u8], len: usize) -> Result<()> {
    if body.len() != len {
        return Err(StoreError::CorruptedEntry(format!(
            "journal entry body size mismatch: expected {}, got {}",
            len,
            body.len()
        )));
    }
    Ok(())
}

/// Journal segment header.
#[derive(Debug, Clone)]
struct SegmentHeader {
    segment_id: u64,
    created_at: i64,
}

impl SegmentHeader {
    const SIZE: usize = 22; // 4 + 2 + 8 + 8

    fn new(segment_id: u64) -> Self {
        Self {
            segment_id,
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(0),
        }
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&JOURNAL_MAGIC)?;
        writer.write_all(&JOURNAL_VERSION.to_le_bytes())?;
        writer.write_all(&self.segment_id.to_le_bytes())?;
        writer.write_all(&self.created_at.to_le_bytes())?;
        Ok(())
    }

    /// Decodes a header from the first [`SIZE`](Self::SIZE) bytes of `buf`.
    fn decode(buf: &[u8]) -> Result<Self> {
        let magic: [u8; 4] = buf
            .get(0..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| StoreError::CorruptedEntry("segment header truncated".to_string()))?;
        if magic != JOURNAL_MAGIC {
            return Err(StoreError::InvalidMagic(magic));
        }
        let version = buf
            .get(4..6)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .ok_or_else(|| StoreError::CorruptedEntry("segment header truncated".to_string()))?;
        if version != JOURNAL_VERSION {
            return Err(StoreError::UnsupportedVersion(version));
        }

        Ok(Self {
            segment_id: read_u64(buf, 6)?,
            created_at: read_u64(buf, 14)? as i64,
        })
    }
}

/// Durable append-only log of store mutations.
///
/// A failed append or compaction never leaves a partial frame behind: the
/// segment is cut back to the last acknowledged entry. If even that fails,
/// the journal is poisoned and every later write returns
/// `StoreError::JournalPoisoned`.
pub struct Journal {
    /// Directory containing segments.
    dir: PathBuf,
    /// Segment currently being appended to.
    current_segment: BufWriter<File>,
    /// Current segment ID.
    current_segment_id: u64,
    /// Current segment size in bytes.
    current_segment_size: usize,
    /// Next sequence number to assign.
    next_sequence: u64,
    /// Set when a failed write could not be rolled back.
    poisoned: bool,
    /// Journal configuration.
    config: JournalConfig,
}

impl Journal {
    /// Opens the journal in `dir`, replaying existing segments.
    ///
    /// The directory is created if missing. Replayed entries are returned in
    /// append order. New appends continue in the last segment, after its
    /// last valid entry; a torn tail is truncated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read, if a segment
    /// belongs to another format (bad magic or version), or if an entry
    /// followed by more data fails its checksum or cannot be decoded.
    pub fn open(dir: impl AsRef<Path>, config: JournalConfig) -> Result<(Self, Vec<JournalEntry>)> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let segments = list_segments(&dir)?;
        let mut entries = Vec::new();
        let mut max_sequence = 0;
        let mut last_segment = None;
        for (segment_id, path) in &segments {
            let replay = read_segment(path)?;
            for (sequence, entry) in replay.entries {
                max_sequence = max_sequence.max(sequence);
                entries.push(entry);
            }
            last_segment = Some((*segment_id, replay.valid_len));
        }
        debug!(
            "Replayed {} journal entries from {} segments in {}",
            entries.len(),
            segments.len(),
            dir.display()
        );

        let (current_segment, current_segment_id, current_segment_size) = match last_segment {
            Some((segment_id, valid_len)) if valid_len >= SegmentHeader::SIZE => {
                let writer = reopen_segment(&dir, segment_id, valid_len)?;
                (writer, segment_id, valid_len)
            }
            // Headerless: the segment is rewritten from scratch.
            Some((segment_id, _)) => {
                let (writer, size) = create_segment(&dir, segment_id)?;
                (writer, segment_id, size)
            }
            None => {
                let (writer, size) = create_segment(&dir, 0)?;
                (writer, 0, size)
            }
        };

        let journal = Self {
            dir,
            current_segment,
            current_segment_id,
            current_segment_size,
            next_sequence: max_sequence + 1,
            poisoned: false,
            config,
        };
        Ok((journal, entries))
    }

    /// Appends an entry and makes it durable according to the sync mode.
    ///
    /// Returns the sequence number assigned to the entry.
    ///
    /// # Errors
    ///
    /// On a write or sync failure the partial frame is discarded before the
    /// error is returned, so the entry is never replayed.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<u64> {
        self.ensure_writable()?;
        let sequence = self.next_sequence;
        let data = entry.to_bytes(sequence);

        if self.current_segment_size + FRAME_HEADER_SIZE + data.len() > self.config.segment_size
            && self.current_segment_size > SegmentHeader::SIZE
        {
            self.rotate_segment()?;
        }

        let offset = self.current_segment_size;
        let written = self.write_entry(&data).and_then(|()| self.sync());
        if let Err(err) = written {
            self.abandon_writes_after(offset);
            return Err(err);
        }
        self.next_sequence += 1;
        Ok(sequence)
    }

    /// Rewrites the journal so that it only holds `live` entries.
    ///
    /// The snapshot is written to a new segment and synced before older
    /// segments are deleted (oldest first), so a crash at any point replays
    /// to the same state.
    pub fn compact(&mut self, live: &[JournalEntry]) -> Result<()> {
        self.ensure_writable()?;
        self.rotate_segment()?;
        let snapshot_segment_id = self.current_segment_id;
        let first_sequence = self.next_sequence;

        if let Err(err) = self.write_snapshot(live) {
            // Older segments still hold the full history.
            self.next_sequence = first_sequence;
            self.abandon_writes_after(SegmentHeader::SIZE);
            return Err(err);
        }

        let mut removed = 0;
        for (segment_id, path) in list_segments(&self.dir)? {
            if segment_id >= snapshot_segment_id {
                continue;
            }
            fs::remove_file(&path)?;
            removed += 1;
        }

        debug!(
            "Compacted journal {} to {} entries, removed {} segments",
            self.dir.display(),
            live.len(),
            removed
        );
        Ok(())
    }

    fn write_snapshot(&mut self, live: &[JournalEntry]) -> Result<()> {
        for entry in live {
            let data = entry.to_bytes(self.next_sequence);
            self.write_entry(&data)?;
            self.next_sequence += 1;
        }
        self.current_segment.flush()?;
        self.current_segment.get_ref().sync_all()?;
        Ok(())
    }

    /// Writes one framed entry to the current segment.
    fn write_entry(&mut self, data: &[u8]) -> Result<()> {
        let crc = crc32fast::hash(data);

        // Write: length (4) + crc (4) + data
        self.current_segment
            .write_all(&(data.len() as u32).to_le_bytes())?;
        self.current_segment.write_all(&crc.to_le_bytes())?;
        self.current_segment.write_all(data)?;

        self.current_segment_size += FRAME_HEADER_SIZE + data.len();
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.current_segment.flush()?;
        match self.config.sync_mode {
            SyncMode::Fsync => self.current_segment.get_ref().sync_all()?,
            SyncMode::Fdatasync => self.current_segment.get_ref().sync_data()?,
            SyncMode::None => {}
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.poisoned {
            return Err(StoreError::JournalPoisoned(self.dir.clone()));
        }
        Ok(())
    }

    /// Rolls the current segment back to `offset` after a failed write,
    /// poisoning the journal if that is not possible.
    fn abandon_writes_after(&mut self, offset: usize) {
        if let Err(err) = self.discard_tail(offset) {
            warn!(
                "Failed to discard partial journal write in {}, refusing further writes: {:?}",
                self.dir.display(),
                err
            );
            self.poisoned = true;
        }
    }

    /// Drops everything past `offset` in the current segment, both the bytes
    /// still buffered and those already handed to the OS.
    fn discard_tail(&mut self, offset: usize) -> Result<()> {
        let file = self.current_segment.get_ref().try_clone()?;
        // into_parts hands back the buffer without flushing it.
        let (_, _unflushed) =
            std::mem::replace(&mut self.current_segment, BufWriter::new(file)).into_parts();

        let file = self.current_segment.get_mut();
        file.set_len(offset as u64)?;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.sync_all()?;
        self.current_segment_size = offset;
        Ok(())
    }

    /// Rotates to a new segment file.
    fn rotate_segment(&mut self) -> Result<()> {
        self.current_segment.flush()?;
        self.current_segment.get_ref().sync_all()?;

        let segment_id = self.current_segment_id + 1;
        let (writer, size) = create_segment(&self.dir, segment_id)?;
        self.current_segment = writer;
        self.current_segment_id = segment_id;
        self.current_segment_size = size;

        debug!(
            "Rotated to new journal segment: {}",
            segment_path(&self.dir, segment_id).display()
        );
        Ok(())
    }

    /// Returns the next sequence number to be assigned.
    pub fn current_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Returns the current segment ID.
    pub fn current_segment_id(&self) -> u64 {
        self.current_segment_id
    }

    /// Returns the journal directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns true if a failed write could not be rolled back.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        if self.poisoned {
            return;
        }
        if let Err(e) = self.current_segment.flush() {
            warn!("Failed to flush journal on drop: {:?}", e);
        }
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("dir", &self.dir)
            .field("current_segment_id", &self.current_segment_id)
            .field("next_sequence", &self.next_sequence)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

/// Generates the path for a segment file.
fn segment_path(dir: &Path, segment_id: u64) -> PathBuf {
    dir.join(format!(
        "{}_{:016x}.{}",
        SEGMENT_PREFIX, segment_id, SEGMENT_EXTENSION
    ))
}

/// Parses the segment ID from a segment file path.
fn parse_segment_id(path: &Path) -> Option<u64> {
    if path.extension()? != SEGMENT_EXTENSION {
        return None;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix(&format!("{}_", SEGMENT_PREFIX)))
        .and_then(|s| u64::from_str_radix(s, 16).ok())
}

/// Lists segments in `dir` sorted by ID.
fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(id) = parse_segment_id(&path) {
            segments.push((id, path));
        }
    }
    segments.sort_by_key(|(id, _)| *id);
    Ok(segments)
}

fn create_segment(dir: &Path, segment_id: u64) -> Result<(BufWriter<File>, usize)> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(segment_path(dir, segment_id))?;

    let mut writer = BufWriter::new(file);
    SegmentHeader::new(segment_id).write_to(&mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok((writer, SegmentHeader::SIZE))
}

/// Opens an existing segment for appending at `valid_len`, cutting off
/// anything past it.
fn reopen_segment(dir: &Path, segment_id: u64, valid_len: usize) -> Result<BufWriter<File>> {
    let path = segment_path(dir, segment_id);
    let mut file = OpenOptions::new().write(true).open(&path)?;
    if file.metadata()?.len() > valid_len as u64 {
        warn!(
            "Truncating journal segment {} to {} bytes",
            path.display(),
            valid_len
        );
        file.set_len(valid_len as u64)?;
        file.sync_all()?;
    }
    file.seek(SeekFrom::Start(valid_len as u64))?;
    Ok(BufWriter::new(file))
}

/// Entries recovered from one segment and the length of its valid prefix.
struct SegmentReplay {
    entries: Vec<(u64, JournalEntry)>,
    valid_len: usize,
}

/// Result of decoding the frame at the start of a buffer.
enum Frame {
    Entry {
        sequence: u64,
        entry: JournalEntry,
        size: usize,
    },
    End,
    Torn,
}

/// Reads a segment, stopping at a torn tail.
fn read_segment(path: &Path) -> Result<SegmentReplay> {
    let bytes = fs::read(path)?;
    if bytes.len() < SegmentHeader::SIZE {
        // Crashed before the header reached disk.
        warn!("Ignoring journal segment without header: {}", path.display());
        return Ok(SegmentReplay {
            entries: Vec::new(),
            valid_len: 0,
        });
    }
    let header = SegmentHeader::decode(&bytes)?;
    debug!(
        "Reading journal segment {} (created at {})",
        header.segment_id, header.created_at
    );

    let mut entries = Vec::new();
    let mut pos = SegmentHeader::SIZE;
    loop {
        match decode_frame(&bytes[pos..])? {
            Frame::Entry {
                sequence,
                entry,
                size,
            } => {
                entries.push((sequence, entry));
                pos += size;
            }
            Frame::End => break,
            Frame::Torn => {
                warn!(
                    "Ignoring torn tail of journal segment {} after {} entries ({} bytes)",
                    path.display(),
                    entries.len(),
                    bytes.len() - pos
                );
                break;
            }
        }
    }
    Ok(SegmentReplay {
        entries,
        valid_len: pos,
    })
}

/// Decodes the frame at the start of `buf`.
///
/// A frame cut short by the end of the buffer, a final frame failing its
/// checksum, or an all-zero remainder is a torn tail. Any other damage is
/// reported as an error.
fn decode_frame(buf: &[u8]) -> Result<Frame> {
    if buf.is_empty() {
        return Ok(Frame::End);
    }
    if buf.iter().all(|&b| b == 0) || buf.len() < FRAME_HEADER_SIZE {
        return Ok(Frame::Torn);
    }

    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let expected = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if !(ENTRY_PREFIX_SIZE..=MAX_ENTRY_SIZE).contains(&len) {
        return Err(StoreError::CorruptedEntry(format!(
            "journal entry length out of range: {}",
            len
        )));
    }

    let size = FRAME_HEADER_SIZE + len;
    let Some(data) = buf.get(FRAME_HEADER_SIZE..size) else {
        return Ok(Frame::Torn);
    };

    let actual = crc32fast::hash(data);
    if actual != expected {
        if size == buf.len() {
            return Ok(Frame::Torn);
        }
        return Err(StoreError::ChecksumMismatch { expected, actual });
    }

    let (sequence, entry) = JournalEntry::from_bytes(data)?;
    Ok(Frame::Entry {
        sequence,
        entry,
        size,
    })
}
