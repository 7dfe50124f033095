//! Data-directory management.
//!
//! File system layout of a store directory:
//!
//! ```text
//! <data_path>/
//! ├─ .lock                          advisory lock, created on open
//! ├─ 1.dat, 2.dat, …                segment files, ascending by creation
//! ├─ compaction/                    transient, present only during compaction
//! └─ compaction_backup/<ts>/…       segments retired by past compactions
//! ```
//!
//! The `.lock` file carries an exclusive advisory lock so only one process
//! can own the directory at a time. The data path must name a directory and
//! end with the platform path separator; missing directories are created.


use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::segment::SEGMENT_SUFFIX;

/// Advisory lock file name inside the data directory.
pub const LOCK_FILE: &str = ".lock";

/// Scratch file used to probe write access during validation.
const ACCESS_PROBE_FILE: &str = ".write-probe";

/// Errors returned by directory operations.
#[derive(Debug, Error)]
pub enum DirError {
    /// Path is empty, lacks the trailing separator, names a non-directory,
    /// or is not writable.
    #[error("invalid data path: {0}")]
    PathInvalid(String),

    /// Another process holds the directory lock.
    #[error("data directory is locked by another process")]
    Locked,

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Validates the data path and ensures the directory exists and is writable.
///
/// The path must be non-empty and end with the platform separator; the
/// directory is created if missing, and write access is probed with a
/// scratch file that is removed immediately.
pub fn validate_data_path(path: &Path) -> Result<PathBuf, DirError> {
    let raw = path.to_string_lossy();
    if raw.is_empty() || !raw.ends_with(MAIN_SEPARATOR) {
        return Err(DirError::PathInvalid(format!(
            "path is mandatory and must end with '{MAIN_SEPARATOR}'"
        )));
    }

    match fs::metadata(path) {
        Ok(meta) if !meta.is_dir() => {
            return Err(DirError::PathInvalid(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(path)?;
        }
        Err(e) => {
            return Err(DirError::PathInvalid(format!(
                "cannot use {}: {e}",
                path.display()
            )));
        }
    }

    probe_write_access(path)?;

    Ok(path.to_path_buf())
}

/// Creates, writes, and removes a scratch file to confirm write access.
fn probe_write_access(dir: &Path) -> Result<(), DirError> {
    let probe = dir.join(ACCESS_PROBE_FILE);

    let attempt = (|| -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).write(true).open(&probe)?;
        file.write_all(b"probe")?;
        drop(file);
        fs::remove_file(&probe)
    })();

    attempt.map_err(|e| {
        DirError::PathInvalid(format!("{} is not writable: {e}", dir.display()))
    })
}

// ------------------------------------------------------------------------------------------------
// Advisory lock
// ------------------------------------------------------------------------------------------------

/// Exclusive advisory lock over a data directory.
///
/// Held for the lifetime of an engine. The lock is released explicitly by
/// [`DirLock::release`] or implicitly when the handle drops.
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Acquires the directory lock, non-blocking.
    ///
    /// Returns [`DirError::Locked`] when another process already holds it.
    pub fn acquire(dir: &Path) -> Result<Self, DirError> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(DirError::Locked);
        }

        debug!(path = %path.display(), "acquired directory lock");
        Ok(Self { file, path })
    }

    /// Releases the lock without waiting for drop.
    pub fn release(&self) -> Result<(), DirError> {
        FileExt::unlock(&self.file)?;
        debug!(path = %self.path.display(), "released directory lock");
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Segment discovery
// ------------------------------------------------------------------------------------------------

/// Enumerates segment files in `dir`, sorted ascending by identifier.
///
/// Only regular `.dat` files with non-zero size count; an empty file is a
/// segment that never received a complete record. File stems that do not
/// parse as an integer identifier are skipped.
pub fn discover_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>, DirError> {
    let mut found = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_SUFFIX) {
            continue;
        }
        if entry.metadata()?.len() == 0 {
            continue;
        }

        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok());
        match id {
            Some(id) if id > 0 => found.push((id, path)),
            _ => {
                warn!(path = %path.display(), "skipping data file without integer identifier");
            }
        }
    }

    found.sort_by_key(|(id, _)| *id);
    Ok(found)
}
