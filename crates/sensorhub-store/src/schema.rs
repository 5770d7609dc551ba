//! Opaque record schema descriptor attached to a record stream.
//!
//! The store never interprets the description; it only uses the stream name.
//! Durable streams persist the descriptor next to their index as
//! `schema.bin`:
//!
//! ```text
//! magic "TSSC" | version u16 | crc32 u32 | body_len u32 | body
//! body = name_len u32 | name | desc_len u32 | desc | enc_flag u8 [| enc_len u32 | enc]
//! ```

use crate::error::{Result, StoreError};
use bytes::Bytes;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Schema file name inside a stream directory.
pub const SCHEMA_FILE_NAME: &str = "schema.bin";

const SCHEMA_MAGIC: [u8; 4] = *b"TSSC";
const SCHEMA_VERSION: u16 = 1;
const SCHEMA_HEADER_SIZE: usize = 14; // 4 + 2 + 4 + 4

/// Record schema descriptor supplied by the sensor driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    name: String,
    description: Bytes,
    recommended_encoding: Option<String>,
}

impl RecordSchema {
    /// Creates a descriptor for the stream `name`.
    pub fn new(name: impl Into<String>, description: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            recommended_encoding: None,
        }
    }

    /// Attaches a recommended encoding label.
    pub fn with_recommended_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.recommended_encoding = Some(encoding.into());
        self
    }

    /// Stream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opaque record description.
    pub fn description(&self) -> &Bytes {
        &self.description
    }

    /// Recommended encoding label, if any.
    pub fn recommended_encoding(&self) -> Option<&str> {
        self.recommended_encoding.as_deref()
    }

    /// Path of the schema file inside `dir`.
    pub fn path_in(dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref().join(SCHEMA_FILE_NAME)
    }

    /// Writes the descriptor to `dir/schema.bin`, replacing any previous one.
    ///
    /// The file is written under a temporary name, synced, then renamed.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let body = self.encode_body();
        let mut bytes = Vec::with_capacity(SCHEMA_HEADER_SIZE + body.len());
        bytes.extend_from_slice(&SCHEMA_MAGIC);
        bytes.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
        bytes.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&body);

        let tmp = dir.join(format!("{SCHEMA_FILE_NAME}.tmp"));
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, Self::path_in(dir))?;
        Ok(())
    }

    /// Reads the descriptor from `dir/schema.bin`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(Self::path_in(dir))?;
        if bytes.len() < SCHEMA_HEADER_SIZE {
            return Err(StoreError::CorruptedEntry(
                "schema file shorter than header".to_string(),
            ));
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        if magic != SCHEMA_MAGIC {
            return Err(StoreError::InvalidMagic(magic));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != SCHEMA_VERSION {
            return Err(StoreError::UnsupportedVersion(version));
        }
        let expected = read_u32(&bytes, 6)?;
        let body_len = read_u32(&bytes, 10)? as usize;
        let body = bytes
            .get(SCHEMA_HEADER_SIZE..SCHEMA_HEADER_SIZE + body_len)
            .ok_or_else(|| StoreError::CorruptedEntry("schema body truncated".to_string()))?;

        let actual = crc32fast::hash(body);
        if actual != expected {
            return Err(StoreError::ChecksumMismatch { expected, actual });
        }
        Self::decode_body(body)
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        put_chunk(&mut body, self.name.as_bytes());
        put_chunk(&mut body, &self.description);
        match &self.recommended_encoding {
            Some(encoding) => {
                body.push(1);
                put_chunk(&mut body, encoding.as_bytes());
            }
            None => body.push(0),
        }
        body
    }

    fn decode_body(body: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let name = take_chunk(body, &mut pos)?;
        let description = take_chunk(body, &mut pos)?;
        let recommended_encoding = match body.get(pos) {
            Some(0) => None,
            Some(1) => {
                pos += 1;
                Some(utf8(take_chunk(body, &mut pos)?)?)
            }
            _ => {
                return Err(StoreError::CorruptedEntry(
                    "invalid schema encoding flag".to_string(),
                ))
            }
        };
        Ok(Self {
            name: utf8(name)?,
            description: Bytes::copy_from_slice(description),
            recommended_encoding,
        })
    }
}

fn put_chunk(buf: &mut Vec<u8>, chunk: &[u8]) {
    buf.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
    buf.extend_from_slice(chunk);
}

fn take_chunk<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let len = read_u32(buf, *pos)? as usize;
    let start = *pos + 4;
    let chunk = buf
        .get(start..start + len)
        .ok_or_else(|| StoreError::CorruptedEntry("schema field truncated".to_string()))?;
    *pos = start + len;
    Ok(chunk)
}

fn read_u32(buf: &[u8], pos: usize) -> Result<u32> {
    buf.get(pos..pos + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| StoreError::CorruptedEntry("unexpected end of schema".to_string()))
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|err| StoreError::CorruptedEntry(format!("schema text is not UTF-8: {err}")))
}
