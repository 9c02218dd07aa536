//! Advisory file locks shared across worker processes.
//!
//! Locks live on a dedicated lock file next to the data they guard, so an
//! atomic rename of the data file never swaps the locked inode out from
//! under a waiting process.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::{trace, warn};

/// Held advisory lock; released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until an exclusive lock on `path` is held.
    pub fn exclusive(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        FileExt::lock_exclusive(&file)
            .with_context(|| format!("lock exclusive {}", path.display()))?;
        trace!(path = %path.display(), "exclusive lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Block until a shared lock on `path` is held.
    pub fn shared(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        FileExt::lock_shared(&file).with_context(|| format!("lock shared {}", path.display()))?;
        trace!(path = %path.display(), "shared lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Try to take an exclusive lock without blocking.
    ///
    /// Returns `Ok(None)` when another holder has it.
    pub fn try_exclusive(path: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(err) => Err(err).with_context(|| format!("try lock {}", path.display())),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), err = %err, "failed to release lock");
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("open lock file {}", path.display()))
}
