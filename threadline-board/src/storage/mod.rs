//! Persistent storage for the board document.
//!
//! Architecture:
//! ```text
//! ┌──────────────┐  exclusive() + load/save  ┌──────────────────────────┐
//! │ MessageBoard │ ─────────────────────────► │ dyn Store                │
//! │  submit()    │                            │                          │
//! │  fetch()     │ ── load() (no lock) ─────► │  FileStore  (JSON+flock) │
//! └──────────────┘                            │  RocksStore (LZ4 + CFs)  │
//!                                             │  MemoryStore             │
//!                                             └──────────────────────────┘
//! ```
//!
//! Every backend replaces the persisted document atomically, so a reader
//! that skips the exclusive section never sees a half-written document.
//! The exclusive section only serializes writers.

pub mod file;
pub mod memory;
pub mod rocks;

pub use file::{FileStore, FileStoreConfig};
pub use memory::MemoryStore;
pub use rocks::{BoardMetadata, RocksStore, RocksStoreConfig};

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use threadline_core::Document;

/// How a backend reacts to a persisted document it cannot parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorruptionPolicy {
    /// Fail the operation with [`StoreError::CorruptionError`]
    #[default]
    Fail,
    /// Log a data-integrity warning and carry on with an empty document.
    /// The next successful submit overwrites the unreadable bytes.
    TreatAsEmpty,
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Reading or writing the backing resource failed
    IoError(String),
    /// RocksDB internal error
    DatabaseError(String),
    /// The document could not be serialized
    SerializationError(String),
    /// The persisted document could not be parsed
    CorruptionError(String),
    /// The exclusive section could not be entered
    LockError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::IoError(e) => write!(f, "I/O error: {e}"),
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::CorruptionError(e) => write!(f, "Storage corruption: {e}"),
            StoreError::LockError(e) => write!(f, "Lock acquisition failed: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::IoError(e.to_string())
    }
}

/// A durable holder of the board document.
///
/// `load` and `save` may be called without holding the exclusive guard;
/// read-modify-write sequences must hold it for their whole duration.
pub trait Store: Send + Sync {
    /// Read the current document. A missing or empty resource is an empty
    /// document.
    fn load(&self) -> Result<Document, StoreError>;

    /// Atomically replace the persisted document.
    fn save(&self, document: &Document) -> Result<(), StoreError>;

    /// Enter the single-writer section. Blocks until the previous holder
    /// drops its guard.
    fn exclusive(&self) -> Result<ExclusiveGuard<'_>, StoreError>;

    /// Short backend name for logs.
    fn kind(&self) -> &'static str;
}

impl<S: Store + ?Sized> Store for Box<S> {
    fn load(&self) -> Result<Document, StoreError> {
        (**self).load()
    }

    fn save(&self, document: &Document) -> Result<(), StoreError> {
        (**self).save(document)
    }

    fn exclusive(&self) -> Result<ExclusiveGuard<'_>, StoreError> {
        (**self).exclusive()
    }

    fn kind(&self) -> &'static str {
        (**self).kind()
    }
}

impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    fn load(&self) -> Result<Document, StoreError> {
        (**self).load()
    }

    fn save(&self, document: &Document) -> Result<(), StoreError> {
        (**self).save(document)
    }

    fn exclusive(&self) -> Result<ExclusiveGuard<'_>, StoreError> {
        (**self).exclusive()
    }

    fn kind(&self) -> &'static str {
        (**self).kind()
    }
}

/// Held for the duration of a read-modify-write. Releases the host-wide
/// lock (if any) and then the in-process lock on drop.
pub struct ExclusiveGuard<'a> {
    _host: Option<file::HostLock>,
    _local: MutexGuard<'a, ()>,
}

impl<'a> ExclusiveGuard<'a> {
    /// Guard backed by an in-process mutex only.
    pub(crate) fn local(lock: &'a Mutex<()>) -> Self {
        Self {
            _host: None,
            _local: lock_ignoring_poison(lock),
        }
    }

    /// Guard backed by an in-process mutex plus an advisory file lock.
    /// The mutex is taken first so threads of one process queue locally.
    pub(crate) fn with_host_lock(
        lock: &'a Mutex<()>,
        acquire: impl FnOnce() -> Result<file::HostLock, StoreError>,
    ) -> Result<Self, StoreError> {
        let local = lock_ignoring_poison(lock);
        let host = acquire()?;
        Ok(Self {
            _host: Some(host),
            _local: local,
        })
    }
}

/// The mutex guards no data, so a panic in a previous holder leaves
/// nothing inconsistent behind.
fn lock_ignoring_poison(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Seconds since the Unix epoch; a clock before 1970 reads as zero.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Decode persisted bytes under the given corruption policy.
pub(crate) fn decode_document(
    bytes: &[u8],
    policy: CorruptionPolicy,
    origin: &str,
) -> Result<Document, StoreError> {
    match Document::decode(bytes) {
        Ok(document) => Ok(document),
        Err(e) => match policy {
            CorruptionPolicy::Fail => Err(StoreError::CorruptionError(format!("{origin}: {e}"))),
            CorruptionPolicy::TreatAsEmpty => {
                log::warn!(
                    "Data integrity: {origin} holds {} unreadable bytes ({e}); treating as empty",
                    bytes.len()
                );
                Ok(Document::new())
            }
        },
    }
}
