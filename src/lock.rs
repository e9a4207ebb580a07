//! Cross-process single-flight guard for snapshot cycles.
//!
//! A cycle holds an exclusive advisory lock on a lock file for its whole
//! duration, so two `qcsnap` processes pointed at the same database never
//! compute overlapping windows. The lock is released when [`CycleLock`] is
//! dropped.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::SnapshotError;

/// Resource name written into the lock file.
pub const CYCLE_LOCK_NAME: &str = "qc_snapshot_cycle";

#[derive(Debug)]
pub struct CycleLock {
    file: File,
    path: PathBuf,
}

impl CycleLock {
    /// Take the lock without waiting.
    ///
    /// Fails with [`SnapshotError::LockUnavailable`] when another holder
    /// has it or the file cannot be opened.
    pub fn acquire(path: &Path) -> Result<Self, SnapshotError> {
        let unavailable = |e: std::io::Error| {
            SnapshotError::LockUnavailable(format!("{}: {}", path.display(), e))
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(unavailable)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(unavailable)?;
        file.try_lock_exclusive().map_err(unavailable)?;

        // Holder info is informational only; the lock itself is what counts.
        file.set_len(0).map_err(unavailable)?;
        writeln!(file, "{} pid={}", CYCLE_LOCK_NAME, std::process::id()).map_err(unavailable)?;

        debug!(path = %path.display(), "Acquired cycle lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CycleLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!(path = %self.path.display(), error = %e, "Failed to release cycle lock");
        }
    }
}
