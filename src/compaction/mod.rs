//! # Compaction
//!
//! Reclaims space by rebuilding the sealed segments into a smaller set
//! containing only each key's latest live value, then atomically splicing
//! the result into the engine.
//!
//! ## Algorithm
//!
//! 1. Take the compaction gate (a mutex distinct from the engine lock) and
//!    snapshot the sealed list — cheap `Arc` copies, immutable thereafter.
//!    The active segment is excluded on purpose: writes that land in it
//!    while compaction runs are preserved untouched.
//! 2. Create `<data_path>/compaction/` exclusively. If it already exists, a
//!    previous compaction crashed or another is running —
//!    [`EngineError::CompactionInProgress`].
//! 3. Open an **inner engine** rooted at the compaction directory with the
//!    identical configuration, and replay the snapshot into it from newest
//!    to oldest: keys already captured are skipped, tombstoned keys are
//!    remembered and suppressed, everything else is `put` (the inner engine
//!    rotates on its own when the size limit is reached).
//! 4. Seal the inner engine's active segment and take the outer engine's
//!    write lock. Retire the snapshot files into
//!    `compaction_backup/<UTC-timestamp>/`, move the inner segment files
//!    into the data directory renumbered `1..=m`, and replace the sealed
//!    list with the compacted segments followed by any segment sealed while
//!    compaction ran.
//! 5. Remove the compaction directory on every exit path.
//!
//! The compacted files are renumbered *below* every surviving identifier:
//! recovery orders segments by identifier, and compacted data is strictly
//! older than anything sealed during the run. Identifier allocation is
//! monotonic, so segments sealed during compaction always carry identifiers
//! greater than the snapshot maximum and the targets `1..=m` are free.
//!
//! ## Failure model
//!
//! Any failure before the splice leaves the outer engine untouched. A
//! failure mid-splice can leave files in the backup directory or renamed in
//! place; the next open indexes whatever `.dat` files remain. Writes issued
//! during compaction land in the active segment and are never lost.
//!
//! ## Background ticker
//!
//! [`Engine::start_background_compaction`] spawns a worker thread that runs
//! [`Engine::compact`] on the configured interval; failures are logged and
//! swallowed so the ticker keeps going. [`Engine::close`] signals shutdown,
//! which unblocks the timer, and joins the worker.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::segment::{self, SealedSegment};

#[cfg(test)]
mod tests;

/// Transient working directory for an in-flight compaction.
pub const COMPACTION_DIR: &str = "compaction";

/// Directory holding segments retired by past compactions.
pub const BACKUP_DIR: &str = "compaction_backup";

/// Counters describing one completed compaction run.
#[derive(Debug, Clone, Default)]
pub struct CompactionSummary {
    /// Sealed segments captured in the snapshot.
    pub input_segments: usize,

    /// Compacted segments spliced back into the engine.
    pub output_segments: usize,

    /// Distinct live keys carried into the compacted segments.
    pub live_keys: usize,

    /// Distinct keys dropped because their latest value was a tombstone.
    pub dropped_tombstones: usize,
}

/// Handle on the background compaction worker thread.
pub struct CompactionTicker {
    shutdown: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl Engine {
    /// Runs one compaction to completion.
    ///
    /// Serialized against other `compact` calls by the compaction gate.
    /// Concurrent `put`/`delete`/`get` proceed throughout; only the final
    /// splice takes the engine's write lock.
    pub fn compact(&self) -> Result<CompactionSummary, EngineError> {
        let _gate = self
            .compaction_gate
            .lock()
            .map_err(|_| EngineError::Internal("compaction gate poisoned".into()))?;

        let snapshot = self.sealed_snapshot()?;
        if snapshot.is_empty() {
            debug!("no sealed segments, nothing to compact");
            return Ok(CompactionSummary::default());
        }

        let compaction_dir = self.data_path.join(COMPACTION_DIR);
        match fs::create_dir(&compaction_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(EngineError::CompactionInProgress);
            }
            Err(e) => return Err(EngineError::Io(e)),
        }

        let result = self.rebuild_and_splice(&compaction_dir, &snapshot);

        if let Err(e) = fs::remove_dir_all(&compaction_dir) {
            warn!(error = %e, "failed to remove compaction directory");
        }

        result
    }

    /// Rebuilds the snapshot into an inner engine and splices the result.
    fn rebuild_and_splice(
        &self,
        compaction_dir: &Path,
        snapshot: &[Arc<SealedSegment>],
    ) -> Result<CompactionSummary, EngineError> {
        // The inner engine shares this engine's exact configuration; its
        // ticker is never started.
        let inner_path = PathBuf::from(format!("{}{MAIN_SEPARATOR}", compaction_dir.display()));
        let inner = Engine::open(&inner_path, (*self.config).clone())?;

        let mut dead: HashSet<&[u8]> = HashSet::new();
        let mut live_keys = 0usize;

        // Newest to oldest, so the first occurrence of a key is its latest.
        for seg in snapshot.iter().rev() {
            for (key, &offset) in &seg.index {
                if dead.contains(key.as_slice()) {
                    continue;
                }
                if inner.index_contains(key)? {
                    continue;
                }

                let value = segment::read_value_at(&seg.path, offset)?;
                if value == self.config.tombstone {
                    dead.insert(key.as_slice());
                    continue;
                }

                inner.put(key, &value)?;
                live_keys += 1;
            }
        }

        inner.seal_active()?;
        let compacted = inner.sealed_snapshot()?;
        inner.close()?;
        drop(inner);

        let summary = CompactionSummary {
            input_segments: snapshot.len(),
            output_segments: compacted.len(),
            live_keys,
            dropped_tombstones: dead.len(),
        };

        self.splice(snapshot, &compacted)?;

        info!(
            input_segments = summary.input_segments,
            output_segments = summary.output_segments,
            live_keys = summary.live_keys,
            dropped_tombstones = summary.dropped_tombstones,
            "compaction complete"
        );

        Ok(summary)
    }

    /// Swaps the compacted segments into the engine under the write lock.
    ///
    /// Snapshot files are retired into a timestamped backup directory; the
    /// compacted files are renumbered `1..=m` into the data directory and
    /// the sealed list becomes compacted-then-survivors.
    fn splice(
        &self,
        snapshot: &[Arc<SealedSegment>],
        compacted: &[Arc<SealedSegment>],
    ) -> Result<(), EngineError> {
        let mut state = self.write_inner()?;

        let backup_dir = self
            .data_path
            .join(BACKUP_DIR)
            .join(Utc::now().format("%Y%m%d%H%M%S").to_string());
        fs::create_dir_all(&backup_dir)?;

        for seg in snapshot {
            let name = seg
                .path
                .file_name()
                .ok_or_else(|| EngineError::Internal("segment path has no file name".into()))?;
            fs::rename(&seg.path, backup_dir.join(name))?;
        }

        let mut new_sealed: Vec<Arc<SealedSegment>> = Vec::with_capacity(
            compacted.len() + state.sealed.len() - snapshot.len(),
        );
        for (i, seg) in compacted.iter().enumerate() {
            let new_id = (i + 1) as u64;
            let dest = segment::segment_path(&self.data_path, new_id);
            fs::rename(&seg.path, &dest)?;
            new_sealed.push(Arc::new(SealedSegment {
                id: new_id,
                path: dest,
                index: seg.index.clone(),
            }));
        }

        let snapshot_ids: HashSet<u64> = snapshot.iter().map(|s| s.id).collect();
        for seg in &state.sealed {
            if !snapshot_ids.contains(&seg.id) {
                new_sealed.push(Arc::clone(seg));
            }
        }

        state.sealed = new_sealed;
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Background ticker
    // --------------------------------------------------------------------------------------------

    /// Starts the background compaction worker.
    ///
    /// Fails when compaction is disabled in the configuration; calling
    /// while the worker is already running is a no-op. The worker runs
    /// [`Engine::compact`] every `compaction_interval`, logging and
    /// swallowing failures so the ticker continues. It is stopped and
    /// joined by [`Engine::close`].
    pub fn start_background_compaction(&self) -> Result<(), EngineError> {
        if !self.config.compaction_enabled {
            return Err(EngineError::Config(
                "background compaction is not enabled".into(),
            ));
        }

        let mut slot = self
            .ticker
            .lock()
            .map_err(|_| EngineError::Internal("ticker slot poisoned".into()))?;
        if slot.is_some() {
            return Ok(());
        }

        let (shutdown, signal) = mpsc::channel();
        let engine = self.clone();
        let interval = self.config.compaction_interval;

        let handle = thread::Builder::new()
            .name("barrelkv-compaction".into())
            .spawn(move || loop {
                match signal.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match engine.compact() {
                        Ok(summary) => debug!(?summary, "background compaction ran"),
                        Err(e) => warn!(error = %e, "background compaction failed"),
                    },
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        info!(interval = ?interval, "started background compaction");
        *slot = Some(CompactionTicker { shutdown, handle });
        Ok(())
    }

    /// Signals the worker to stop and joins it. No-op when not running.
    pub(crate) fn stop_background_compaction(&self) -> Result<(), EngineError> {
        let ticker = self
            .ticker
            .lock()
            .map_err(|_| EngineError::Internal("ticker slot poisoned".into()))?
            .take();

        if let Some(CompactionTicker { shutdown, handle }) = ticker {
            let _ = shutdown.send(());
            handle
                .join()
                .map_err(|_| EngineError::Internal("compaction worker panicked".into()))?;
            info!("stopped background compaction");
        }
        Ok(())
    }
}
