//! JSON documents shared between processes.
//!
//! Reads take a shared lock, read-modify-write cycles take an exclusive lock
//! for the whole cycle. Writes go to a temp file in the same directory,
//! are synced to storage and then renamed over the target, so readers only
//! ever see a complete document.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::io::lock::FileLock;

/// A JSON document at `path`, guarded by the lock file `<path>.lock`.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document under a shared lock.
    ///
    /// A missing or unparseable file yields `T::default()`.
    pub fn read<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let _lock = FileLock::shared(&self.lock_path)?;
        self.load()
    }

    /// Apply `mutate` to the document under an exclusive lock and persist it.
    pub fn update<T, R, F>(&self, mutate: F) -> Result<R>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> R,
    {
        let _lock = FileLock::exclusive(&self.lock_path)?;
        let mut doc: T = self.load()?;
        let result = mutate(&mut doc);
        self.persist(&doc)?;
        Ok(result)
    }

    /// Overwrite the document under an exclusive lock.
    pub fn write<T: Serialize>(&self, doc: &T) -> Result<()> {
        let _lock = FileLock::exclusive(&self.lock_path)?;
        self.persist(doc)
    }

    fn load<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        if !self.path.exists() {
            return Ok(T::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        match serde_json::from_str(&contents) {
            Ok(doc) => Ok(doc),
            Err(err) => {
                warn!(path = %self.path.display(), err = %err, "unparseable document, starting empty");
                Ok(T::default())
            }
        }
    }

    fn persist<T: Serialize>(&self, doc: &T) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(doc).context("serialize json")?;
        buf.push('\n');
        write_atomic(&self.path, buf.as_bytes())
    }
}

/// Write `contents` to `path` via temp file, fsync and rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;

    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("write temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync temp file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("replace {}", path.display()))?;
    debug!(path = %path.display(), bytes = contents.len(), "wrote file atomically");
    Ok(())
}
