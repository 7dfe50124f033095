//! # Storage engine
//!
//! A Bitcask-style log-structured engine: every `put` and `delete` appends
//! one record to the active segment and updates that segment's in-memory
//! index; `get` resolves a key with at most one positional disk read.
//!
//! ## Design overview
//!
//! The engine owns an ordered list of **sealed** (read-only) segments and a
//! single **active** (writable) segment, queried newest-first:
//!
//! 1. **Active segment** — the unique file accepting appends. When its size
//!    reaches [`EngineConfig::max_segment_bytes`] *before* an append, it is
//!    sealed and a fresh active segment is created.
//! 2. **Sealed segments** — immutable files, oldest first. Their indexes are
//!    frozen at sealing and shared as `Arc`s; compaction is the only thing
//!    that ever retires them.
//!
//! For any key present in several segments, the authoritative value is the
//! one in the highest-identifier segment (active > newest sealed > … >
//! oldest sealed). A record whose value equals the configured tombstone
//! means "key deleted".
//!
//! ## Concurrency model
//!
//! State sits behind a single `Arc<RwLock<EngineInner>>`. `put`/`delete`
//! acquire the **write lock** for the whole append; `get` acquires the
//! **read lock** only long enough to probe the active index and snapshot the
//! sealed list, then reads from disk with no engine lock held. That is safe
//! because segment files only ever grow while reachable from an index: a
//! recorded offset stays valid under concurrent appends, and the index
//! update is the commit point of every append.
//!
//! Compaction (see [`crate::compaction`]) rebuilds the sealed list off to
//! the side and takes the write lock only for the final splice.
//!
//! ## Durability
//!
//! Appends are not fsynced individually; [`Engine::close`] syncs the active
//! segment. Recovery tolerates a partial record at the tail of any segment
//! by discarding it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::compaction::CompactionTicker;
use crate::dir::{self, DirError, DirLock};
use crate::segment::{self, ActiveSegment, SealedSegment, SegmentError};

#[cfg(test)]
pub(crate) mod tests;

/// Default tombstone marker; unlikely to collide with a real value.
pub const DEFAULT_TOMBSTONE: &[u8] = b"tombstone-jbc46-q42fd-pggmc-kp38y-6mqd8";

/// Default maximum active-segment size before rotation (10 MiB).
pub const DEFAULT_MAX_SEGMENT_BYTES: u64 = 10 * 1024 * 1024;

/// Default maximum key length (1 KiB).
pub const DEFAULT_MAX_KEY_BYTES: u64 = 1024;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error from the data-directory subsystem (invalid path, lock held).
    #[error("directory error: {0}")]
    Dir(#[from] DirError),

    /// Error from the segment subsystem.
    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    /// Invalid configuration option.
    #[error("invalid option: {0}")]
    Config(String),

    /// The key is empty or exceeds the configured maximum length.
    #[error("invalid key: {0}")]
    KeyInvalid(String),

    /// The value exceeds the segment size limit or equals the tombstone.
    #[error("invalid value: {0}")]
    ValueInvalid(String),

    /// A compaction is already in progress, or a previous one crashed and
    /// left its working directory behind.
    #[error("compaction already in progress or not cleaned up")]
    CompactionInProgress,

    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Configuration for an [`Engine`] instance.
///
/// Immutable once the engine is open; the engine keeps a snapshot so the
/// compactor can construct its inner engine with identical settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max active-segment size in bytes; reaching it rotates to a new
    /// segment before the next append. Also bounds value length.
    pub max_segment_bytes: u64,

    /// Max key length in bytes. Keys live in memory in every segment index,
    /// so keeping them small keeps the index footprint small.
    pub max_key_bytes: u64,

    /// Reserved value marking a key as deleted. Must be non-empty; `put`
    /// rejects this exact value. The tombstone is part of the directory's
    /// logical format: engines opened over one directory with different
    /// tombstones will disagree on which records are deletions.
    pub tombstone: Vec<u8>,

    /// Whether the background compaction ticker may be started.
    pub compaction_enabled: bool,

    /// Interval between background compaction runs; must be non-zero when
    /// compaction is enabled.
    pub compaction_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_segment_bytes: DEFAULT_MAX_SEGMENT_BYTES,
            max_key_bytes: DEFAULT_MAX_KEY_BYTES,
            tombstone: DEFAULT_TOMBSTONE.to_vec(),
            compaction_enabled: false,
            compaction_interval: Duration::from_secs(3600),
        }
    }
}

impl EngineConfig {
    /// Validates the configuration before any I/O happens.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_segment_bytes == 0 {
            return Err(EngineError::Config(
                "max_segment_bytes must be positive".into(),
            ));
        }
        if self.max_key_bytes == 0 {
            return Err(EngineError::Config("max_key_bytes must be positive".into()));
        }
        if self.tombstone.is_empty() {
            return Err(EngineError::Config("tombstone must not be empty".into()));
        }
        if self.compaction_enabled && self.compaction_interval.is_zero() {
            return Err(EngineError::Config(
                "compaction_interval must be non-zero when compaction is enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Number of sealed segments.
    pub sealed_segments: usize,

    /// Identifier of the active segment.
    pub active_segment_id: u64,

    /// Bytes written to the active segment since its creation.
    pub active_size_bytes: u64,
}

pub(crate) struct EngineInner {
    /// Sealed segments, oldest first. Shared with readers and compaction
    /// snapshots; entries are immutable once in this list.
    pub(crate) sealed: Vec<Arc<SealedSegment>>,

    /// The unique writable segment.
    pub(crate) active: ActiveSegment,

    /// Next segment identifier. Monotonic, derived from the maximum
    /// identifier discovered at open, never reset, so the active segment's
    /// identifier always exceeds every sealed identifier.
    pub(crate) next_file_id: u64,

    /// Held for the lifetime of the engine; released in `close`.
    pub(crate) dir_lock: DirLock,
}

/// The storage engine handle.
///
/// Thread-safe: cloning shares the same underlying state, so the handle can
/// be handed to reader and writer threads freely.
pub struct Engine {
    pub(crate) inner: Arc<RwLock<EngineInner>>,

    /// Immutable configuration snapshot.
    pub(crate) config: Arc<EngineConfig>,

    /// Root of the store's directory tree.
    pub(crate) data_path: PathBuf,

    /// Serializes compaction runs, distinct from the engine RwLock.
    pub(crate) compaction_gate: Arc<Mutex<()>>,

    /// Background compaction worker, when started.
    pub(crate) ticker: Arc<Mutex<Option<CompactionTicker>>>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            config: Arc::clone(&self.config),
            data_path: self.data_path.clone(),
            compaction_gate: Arc::clone(&self.compaction_gate),
            ticker: Arc::clone(&self.ticker),
        }
    }
}

impl Engine {
    /// Opens (or creates) a store rooted at the given directory.
    ///
    /// The path must end with the platform separator. Existing segment
    /// files are discovered, sorted by identifier, and scanned to rebuild
    /// their indexes; a fresh active segment is then created with the next
    /// identifier. The directory's advisory lock is held until [`close`].
    ///
    /// [`close`]: Engine::close
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let data_path = dir::validate_data_path(path.as_ref())?;
        let dir_lock = DirLock::acquire(&data_path)?;

        let mut sealed = Vec::new();
        for (id, file_path) in dir::discover_segments(&data_path)? {
            let seg = SealedSegment::open(id, file_path)?;
            debug!(id, keys = seg.index.len(), "recovered sealed segment");
            sealed.push(Arc::new(seg));
        }

        let next_file_id = sealed.last().map(|s| s.id).unwrap_or(0) + 1;
        let active = ActiveSegment::create(&data_path, next_file_id)?;

        info!(
            path = %data_path.display(),
            sealed = sealed.len(),
            active_id = active.id,
            "opened store"
        );

        Ok(Self {
            inner: Arc::new(RwLock::new(EngineInner {
                sealed,
                active,
                next_file_id: next_file_id + 1,
                dir_lock,
            })),
            config: Arc::new(config),
            data_path,
            compaction_gate: Arc::new(Mutex::new(())),
            ticker: Arc::new(Mutex::new(None)),
        })
    }

    /// Records `value` as the latest value of `key`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.validate_key(key)?;
        self.validate_value(value)?;
        self.append(key, value)
    }

    /// Marks `key` as deleted by appending a tombstone record.
    ///
    /// Subsequent [`get`](Engine::get) calls yield `None` until the key is
    /// put again. Deleting an absent key succeeds silently.
    pub fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        self.validate_key(key)?;
        let tombstone = self.config.tombstone.clone();
        self.append(key, &tombstone)
    }

    /// Looks up the current value of `key`.
    ///
    /// Probes the active segment's index first, then sealed segments from
    /// newest to oldest; the first hit resolves the lookup with one
    /// positional read. Returns `Ok(None)` when the key is absent or its
    /// latest value is a tombstone.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        self.validate_key(key)?;

        // Snapshot under the shared lock; read files after release. The
        // active file is append-only, so a recorded offset stays valid even
        // while concurrent appends extend the file.
        let (active_hit, sealed) = {
            let inner = self.read_inner()?;
            match inner.active.index.get(key) {
                Some(&offset) => (Some((inner.active.path.clone(), offset)), Vec::new()),
                None => (None, inner.sealed.clone()),
            }
        };

        let located = match active_hit {
            Some(hit) => Some(hit),
            None => sealed
                .iter()
                .rev()
                .find_map(|seg| seg.index.get(key).map(|&off| (seg.path.clone(), off))),
        };

        let Some((path, offset)) = located else {
            return Ok(None);
        };

        let value = segment::read_value_at(&path, offset)?;
        if value == self.config.tombstone {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let inner = self.read_inner()?;
        Ok(EngineStats {
            sealed_segments: inner.sealed.len(),
            active_segment_id: inner.active.id,
            active_size_bytes: inner.active.size,
        })
    }

    /// Shuts the engine down: stops the background compaction ticker, syncs
    /// the active segment, and releases the directory lock.
    ///
    /// Call at most once; file handles close when the last clone drops.
    pub fn close(&self) -> Result<(), EngineError> {
        self.stop_background_compaction()?;

        let inner = self.read_inner()?;
        inner.active.sync()?;
        inner.dir_lock.release()?;

        info!(path = %self.data_path.display(), "closed store");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Append path
    // --------------------------------------------------------------------------------------------

    /// Shared append path for `put` and `delete`.
    ///
    /// Rotation is decided on the size *before* this append: a record may
    /// push the active segment past the limit and still lands in it; the
    /// next append then rotates.
    fn append(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        let mut inner = self.write_inner()?;

        if inner.active.size >= self.config.max_segment_bytes {
            Self::rotate(&mut inner, &self.data_path)?;
        }

        inner.active.append(key, value)?;
        Ok(())
    }

    /// Seals the active segment and creates its replacement.
    ///
    /// The replacement is created first: if that fails, the old active
    /// segment is untouched and remains usable.
    fn rotate(inner: &mut EngineInner, data_path: &Path) -> Result<(), EngineError> {
        let id = inner.next_file_id;
        let new_active = ActiveSegment::create(data_path, id)?;
        inner.next_file_id += 1;

        let old_active = std::mem::replace(&mut inner.active, new_active);
        info!(
            sealed_id = old_active.id,
            sealed_size = old_active.size,
            new_id = id,
            "rotated active segment"
        );
        inner.sealed.push(Arc::new(old_active.seal()));

        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Validation
    // --------------------------------------------------------------------------------------------

    fn validate_key(&self, key: &[u8]) -> Result<(), EngineError> {
        if key.is_empty() {
            return Err(EngineError::KeyInvalid("key must not be empty".into()));
        }
        if key.len() as u64 > self.config.max_key_bytes {
            return Err(EngineError::KeyInvalid(format!(
                "key exceeds {} bytes",
                self.config.max_key_bytes
            )));
        }
        Ok(())
    }

    fn validate_value(&self, value: &[u8]) -> Result<(), EngineError> {
        if value.len() as u64 > self.config.max_segment_bytes {
            return Err(EngineError::ValueInvalid(format!(
                "value exceeds {} bytes",
                self.config.max_segment_bytes
            )));
        }
        if value == self.config.tombstone.as_slice() {
            return Err(EngineError::ValueInvalid(
                "value is reserved as the tombstone marker".into(),
            ));
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Internal accessors
    // --------------------------------------------------------------------------------------------

    pub(crate) fn read_inner(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, EngineInner>, EngineError> {
        self.inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))
    }

    pub(crate) fn write_inner(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, EngineInner>, EngineError> {
        self.inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))
    }

    /// True when any segment index holds `key`, without touching disk.
    /// Used by compaction to skip keys it has already captured.
    pub(crate) fn index_contains(&self, key: &[u8]) -> Result<bool, EngineError> {
        let inner = self.read_inner()?;
        Ok(inner.active.index.contains_key(key)
            || inner.sealed.iter().any(|seg| seg.index.contains_key(key)))
    }

    /// Clones the sealed list: cheap `Arc` copies, read-only thereafter.
    pub(crate) fn sealed_snapshot(&self) -> Result<Vec<Arc<SealedSegment>>, EngineError> {
        Ok(self.read_inner()?.sealed.clone())
    }

    /// Seals the active segment (if non-empty) and opens a replacement.
    /// Used by compaction to finalize its inner engine before handover.
    pub(crate) fn seal_active(&self) -> Result<(), EngineError> {
        let mut inner = self.write_inner()?;
        if inner.active.size == 0 {
            return Ok(());
        }
        inner.active.sync()?;
        Self::rotate(&mut inner, &self.data_path)
    }
}
