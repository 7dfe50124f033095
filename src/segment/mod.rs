//! Segment files.
//!
//! A segment is one append-only data file named `<n>.dat`, where `n` is a
//! positive integer identifier; identifier order equals creation order. A
//! segment is in exactly one of two states:
//!
//! - **Active** — the unique segment currently accepting appends, owned by
//!   the engine together with its in-memory index and running byte size.
//! - **Sealed** — read-only. Sealed files are immutable until retired by
//!   compaction; their indexes never change after sealing.
//!
//! ## Index offsets
//!
//! The per-segment index maps each key to the absolute byte offset at which
//! that key's **value length field** begins — not the start of the record and
//! not the start of the value bytes. [`read_value_at`] seeks to that offset
//! and decodes a single length-prefixed payload without touching the key.
//!
//! ## Read model
//!
//! Sealed segments hold no open file handle; every read opens the file
//! fresh, seeks, and reads one chunk. A previously recorded offset in the
//! active segment stays valid under concurrent appends because the file only
//! ever grows.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, trace, warn};

use crate::record::{self, RecordError, LEN_PREFIX_BYTES};

/// File-name suffix for segment data files.
pub const SEGMENT_SUFFIX: &str = "dat";

/// Per-segment mapping from key to the offset of its value length field.
pub type SegmentIndex = HashMap<Vec<u8>, u64>;

/// Errors returned by segment operations.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Codec-level failure while reading a record.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// A positional read found less data than the index promised.
    #[error("truncated record in {path} at offset {offset}")]
    TruncatedRecord {
        /// Segment file the read targeted.
        path: PathBuf,
        /// Offset of the value length field.
        offset: u64,
    },
}

/// Builds the on-disk path of segment `id` inside `dir`.
pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id}.{SEGMENT_SUFFIX}"))
}

// ------------------------------------------------------------------------------------------------
// Active segment
// ------------------------------------------------------------------------------------------------

/// The unique writable segment.
///
/// Owns the append handle, the in-memory index, and the running byte size.
/// The size is tracked from the bytes handed to each write, never read back
/// from the filesystem on the hot path.
#[derive(Debug)]
pub struct ActiveSegment {
    /// Segment identifier; strictly exceeds every sealed identifier.
    pub id: u64,

    /// On-disk path of the segment file.
    pub path: PathBuf,

    /// Key → value-offset for every record appended so far.
    pub index: SegmentIndex,

    /// Bytes written since creation; equals the file's write position.
    pub size: u64,

    file: File,
}

impl ActiveSegment {
    /// Creates segment `id` inside `dir`, open for append.
    pub fn create(dir: &Path, id: u64) -> Result<Self, SegmentError> {
        let path = segment_path(dir, id);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        info!(id, path = %path.display(), "created active segment");

        Ok(Self {
            id,
            path,
            index: SegmentIndex::new(),
            size: 0,
            file,
        })
    }

    /// Appends one record and records the key in the index.
    ///
    /// Returns the offset at which the value length field begins — the
    /// position immediately after `len32(key) || key`. The index update is
    /// the commit point: a concurrent reader sees either the prior value or
    /// the new one, never a torn record.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<u64, SegmentError> {
        use std::io::Write;

        let value_offset = self.size + (LEN_PREFIX_BYTES + key.len()) as u64;
        let encoded = record::encode(key, value);

        self.file.write_all(&encoded)?;
        self.size += encoded.len() as u64;
        self.index.insert(key.to_vec(), value_offset);

        trace!(
            id = self.id,
            key_len = key.len(),
            value_len = value.len(),
            value_offset,
            "appended record"
        );

        Ok(value_offset)
    }

    /// Flushes the segment file to disk.
    pub fn sync(&self) -> Result<(), SegmentError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Seals the segment: the write handle is closed and the index frozen.
    pub fn seal(self) -> SealedSegment {
        info!(id = self.id, size = self.size, "sealed segment");
        SealedSegment {
            id: self.id,
            path: self.path,
            index: self.index,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Sealed segment
// ------------------------------------------------------------------------------------------------

/// A read-only segment: identifier, path, and frozen index.
///
/// Shared between the engine and compaction snapshots without further
/// synchronization; nothing mutates a sealed segment until a successful
/// compaction retires its file.
#[derive(Debug)]
pub struct SealedSegment {
    /// Segment identifier.
    pub id: u64,

    /// On-disk path of the segment file.
    pub path: PathBuf,

    /// Key → value-offset for the latest occurrence of each key.
    pub index: SegmentIndex,
}

impl SealedSegment {
    /// Opens an existing segment file and rebuilds its index by scanning.
    ///
    /// Duplicate keys within the file keep the later occurrence. A record
    /// cut short at end-of-file (a crash mid-append) is discarded and the
    /// scan ends there.
    pub fn open(id: u64, path: PathBuf) -> Result<Self, SegmentError> {
        let index = scan_index(&path)?;
        Ok(Self { id, path, index })
    }
}

/// Scans a segment file from the start, building its index.
///
/// Emits, per record, the key and the offset of its value length field;
/// sequential insertion makes the later duplicate win. A truncated record
/// at the tail means the log ends there: the partial record is dropped.
fn scan_index(path: &Path) -> Result<SegmentIndex, SegmentError> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut index = SegmentIndex::new();
    let mut pos: u64 = 0;

    loop {
        let key = match record::read_chunk(&mut reader) {
            Ok(Some(key)) => key,
            Ok(None) => break,
            Err(RecordError::Truncated { .. }) => {
                warn!(path = %path.display(), pos, "partial record at end of segment, discarding");
                break;
            }
            Err(RecordError::Io(e)) => return Err(SegmentError::Io(e)),
        };

        let value_offset = pos + (LEN_PREFIX_BYTES + key.len()) as u64;

        let mut len_buf = [0u8; LEN_PREFIX_BYTES];
        if let Err(e) = reader.read_exact(&mut len_buf) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                warn!(path = %path.display(), pos, "partial record at end of segment, discarding");
                break;
            }
            return Err(SegmentError::Io(e));
        }
        let value_len = u32::from_le_bytes(len_buf) as u64;

        let record_end = value_offset + LEN_PREFIX_BYTES as u64 + value_len;
        if record_end > file_len {
            warn!(path = %path.display(), pos, "partial record at end of segment, discarding");
            break;
        }

        reader.seek_relative(value_len as i64)?;
        index.insert(key, value_offset);
        pos = record_end;
    }

    Ok(index)
}

// ------------------------------------------------------------------------------------------------
// Positional reads
// ------------------------------------------------------------------------------------------------

/// Reads the value whose length field begins at `offset` in the segment file
/// at `path`.
///
/// Opens the file fresh, seeks, and decodes one length-prefixed payload; the
/// key is not read. A short read here is corruption, not a tolerable tail:
/// the index promised a complete record at this position.
pub fn read_value_at(path: &Path, offset: u64) -> Result<Vec<u8>, SegmentError> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;

    match record::read_chunk(&mut file)? {
        Some(value) => Ok(value),
        None => Err(SegmentError::TruncatedRecord {
            path: path.to_path_buf(),
            offset,
        }),
    }
}
