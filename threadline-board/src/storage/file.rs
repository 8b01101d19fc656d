//! JSON file store with a host-wide advisory lock.
//!
//! Layout on disk:
//! ```text
//! <dir>/messages.json        — the document (bare JSON array)
//! <dir>/messages.json.lock   — advisory lock target, never holds data
//! <dir>/.tmpXXXXXX           — in-flight write, renamed over messages.json
//! ```
//!
//! Writers take an in-process mutex and then an exclusive lock on the
//! sidecar file, so separate processes sharing the directory serialize
//! too. Saves write a temp file in the same directory and rename it over
//! the target; readers never lock and see either the old or the new
//! document.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use threadline_core::Document;

use super::{decode_document, CorruptionPolicy, ExclusiveGuard, Store, StoreError};

/// File store configuration.
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Document path (default: `messages.json`)
    pub path: PathBuf,
    /// Reaction to an unparseable document (default: fail)
    pub corruption_policy: CorruptionPolicy,
    /// fsync the temp file before renaming (default: true)
    pub sync_writes: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("messages.json"),
            corruption_policy: CorruptionPolicy::Fail,
            sync_writes: true,
        }
    }
}

impl FileStoreConfig {
    /// Create config for testing (no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            corruption_policy: CorruptionPolicy::Fail,
            sync_writes: false,
        }
    }
}

/// An exclusive advisory lock on a file, released on drop.
pub(crate) struct HostLock {
    file: File,
}

impl HostLock {
    fn acquire(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StoreError::LockError(format!("open {}: {e}", path.display())))?;
        file.lock()
            .map_err(|e| StoreError::LockError(format!("lock {}: {e}", path.display())))?;
        Ok(Self { file })
    }
}

impl Drop for HostLock {
    fn drop(&mut self) {
        // Closing the handle releases the lock as well
        let _ = self.file.unlock();
    }
}

/// Board document persisted as a single JSON file.
pub struct FileStore {
    config: FileStoreConfig,
    lock_path: PathBuf,
    writer: Mutex<()>,
}

impl FileStore {
    /// Open a store at the configured path, creating the parent directory
    /// if needed. The document file itself is created on first save.
    pub fn open(config: FileStoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = non_empty_parent(&config.path) {
            fs::create_dir_all(parent)?;
        }

        let mut lock_name = OsString::from(config.path.as_os_str());
        lock_name.push(".lock");
        let lock_path = PathBuf::from(lock_name);

        log::info!("Opened file store at {}", config.path.display());

        Ok(Self {
            config,
            lock_path,
            writer: Mutex::new(()),
        })
    }

    /// Document path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Sidecar lock file path.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Store for FileStore {
    fn load(&self) -> Result<Document, StoreError> {
        let bytes = match fs::read(&self.config.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(e) => return Err(e.into()),
        };
        let origin = self.config.path.display().to_string();
        decode_document(&bytes, self.config.corruption_policy, &origin)
    }

    fn save(&self, document: &Document) -> Result<(), StoreError> {
        let bytes = document
            .encode()
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        let dir = non_empty_parent(&self.config.path).unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        // The rename replaces the inode, so carry the old file's mode over
        match fs::metadata(&self.config.path) {
            Ok(meta) => tmp.as_file().set_permissions(meta.permissions())?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tmp.write_all(&bytes)?;
        if self.config.sync_writes {
            tmp.as_file().sync_all()?;
        }
        tmp.persist(&self.config.path).map_err(|e| StoreError::from(e.error))?;

        log::trace!("Wrote {} bytes to {}", bytes.len(), self.config.path.display());
        Ok(())
    }

    fn exclusive(&self) -> Result<ExclusiveGuard<'_>, StoreError> {
        ExclusiveGuard::with_host_lock(&self.writer, || HostLock::acquire(&self.lock_path))
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}

/// `Path::parent` yields `Some("")` for bare file names.
fn non_empty_parent(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}
