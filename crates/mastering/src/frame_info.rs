//! The per-reel picture index (`picture.info`).
//!
//! One fixed-size record per (frame, eye) slot: the encoded picture's offset
//! and size in the picture asset and the source hash it was encoded from.
//! Slot `frame × 2` holds the left (or only) eye and `frame × 2 + 1` the right,
//! so a single record can be rewritten in place without touching the rest.
//!
//! A run writes its records to a fresh file next to the previous index, which
//! is opened read-only for reuse lookups.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use reelkit_common::error::{ReelkitError, ReelkitResult};
use reelkit_player::Eyes;

/// `u64` offset, `u64` size, 64 hash bytes.
pub const RECORD_BYTES: u64 = 80;

const HASH_BYTES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub offset: u64,
    pub size: u64,
    /// Hex SHA-256 of the source picture.
    pub hash: String,
}

impl FrameInfo {
    fn to_record(&self) -> [u8; RECORD_BYTES as usize] {
        let mut record = [0u8; RECORD_BYTES as usize];
        record[0..8].copy_from_slice(&self.offset.to_le_bytes());
        record[8..16].copy_from_slice(&self.size.to_le_bytes());
        let hash = self.hash.as_bytes();
        let n = hash.len().min(HASH_BYTES);
        record[16..16 + n].copy_from_slice(&hash[..n]);
        record
    }

    fn from_record(record: &[u8; RECORD_BYTES as usize]) -> Option<Self> {
        if record.iter().all(|b| *b == 0) {
            return None;
        }
        let offset = u64::from_le_bytes(record[0..8].try_into().ok()?);
        let size = u64::from_le_bytes(record[8..16].try_into().ok()?);
        let hash = &record[16..];
        let end = hash.iter().position(|b| *b == 0).unwrap_or(HASH_BYTES);
        let hash = std::str::from_utf8(&hash[..end]).ok()?.to_string();
        Some(Self { offset, size, hash })
    }
}

/// Record slot of a (frame, eye) pair.
pub fn slot(frame: i64, eyes: Eyes) -> u64 {
    frame.max(0) as u64 * 2 + u64::from(eyes == Eyes::Right)
}

pub struct FrameInfoFile {
    file: File,
    path: PathBuf,
}

impl FrameInfoFile {
    /// Create an empty index for writing, replacing any file at `path`.
    pub fn create(path: impl AsRef<Path>) -> ReelkitResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| ReelkitError::write(&path, e.to_string()))?;
        Ok(Self { file, path })
    }

    /// Open an existing index read-only; `None` if there is none.
    pub fn open_existing(path: impl AsRef<Path>) -> ReelkitResult<Option<Self>> {
        let path = path.as_ref().to_path_buf();
        match File::open(&path) {
            Ok(file) => Ok(Some(Self { file, path })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ReelkitError::write(&path, e.to_string())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The record for `(frame, eyes)`; `None` if never written.
    pub fn read(&mut self, frame: i64, eyes: Eyes) -> ReelkitResult<Option<FrameInfo>> {
        let mut record = [0u8; RECORD_BYTES as usize];
        self.file
            .seek(SeekFrom::Start(slot(frame, eyes) * RECORD_BYTES))?;
        match self.file.read_exact(&mut record) {
            Ok(()) => Ok(FrameInfo::from_record(&record)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(ReelkitError::write(&self.path, e.to_string())),
        }
    }

    /// Overwrite the record for `(frame, eyes)` only.
    pub fn write(&mut self, frame: i64, eyes: Eyes, info: &FrameInfo) -> ReelkitResult<()> {
        self.file
            .seek(SeekFrom::Start(slot(frame, eyes) * RECORD_BYTES))?;
        self.file
            .write_all(&info.to_record())
            .map_err(|e| ReelkitError::write(&self.path, e.to_string()))
    }

    /// Cut the index to `frames` frames and flush it to disk.
    pub fn finish(&mut self, frames: i64) -> ReelkitResult<()> {
        self.file
            .set_len(frames.max(0) as u64 * 2 * RECORD_BYTES)
            .and_then(|()| self.file.sync_all())
            .map_err(|e| ReelkitError::write(&self.path, e.to_string()))
    }
}
