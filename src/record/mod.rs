//! On-disk record codec.
//!
//! A record is two length-prefixed byte strings back to back:
//!
//! ```text
//! [u32 key_len LE][key_bytes][u32 value_len LE][value_bytes]
//! ```
//!
//! There is no header, no type tag, no timestamp, and no checksum. Keys and
//! values are opaque byte strings; the format is binary-clean. A value equal
//! to the engine's configured tombstone marks the paired key as deleted.
//!
//! Reading distinguishes two end conditions:
//!
//! - **End of stream** — zero bytes remain at a record boundary.
//!   [`read_chunk`] returns `Ok(None)`.
//! - **Truncated** — the stream ends partway through a length prefix or
//!   payload (a crash mid-append). [`read_chunk`] returns
//!   [`RecordError::Truncated`]; the caller decides whether that position is
//!   a tolerable end-of-file or corruption.


use std::io::{self, Read};

use thiserror::Error;

/// Width of the little-endian length prefix, in bytes.
pub const LEN_PREFIX_BYTES: usize = std::mem::size_of::<u32>();

/// Errors returned by the record codec.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended partway through a chunk.
    #[error("truncated record: expected {expected} bytes, found {found}")]
    Truncated {
        /// Bytes the length prefix (or prefix itself) promised.
        expected: usize,
        /// Bytes actually available.
        found: usize,
    },
}

/// Encodes one key/value pair into its on-disk byte sequence.
///
/// Layout: `len32(key) || key || len32(value) || value`, lengths unsigned
/// 32-bit little-endian.
pub fn encode(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(key, value) as usize);
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value);
    buf
}

/// Total encoded size of one record.
pub fn encoded_len(key: &[u8], value: &[u8]) -> u64 {
    (2 * LEN_PREFIX_BYTES + key.len() + value.len()) as u64
}

/// Reads one length-prefixed byte string from `reader`.
///
/// Returns `Ok(None)` when zero bytes remain at a chunk boundary, and
/// [`RecordError::Truncated`] when the stream ends partway through the
/// length prefix or the payload.
pub fn read_chunk<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, RecordError> {
    let mut len_buf = [0u8; LEN_PREFIX_BYTES];
    let filled = fill(reader, &mut len_buf)?;
    if filled == 0 {
        return Ok(None);
    }
    if filled < LEN_PREFIX_BYTES {
        return Err(RecordError::Truncated {
            expected: LEN_PREFIX_BYTES,
            found: filled,
        });
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    let filled = fill(reader, &mut payload)?;
    if filled < len {
        return Err(RecordError::Truncated {
            expected: len,
            found: filled,
        });
    }

    Ok(Some(payload))
}

/// Reads into `buf` until it is full or the stream ends; returns the number
/// of bytes read.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, RecordError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(RecordError::Io(e)),
        }
    }
    Ok(filled)
}
