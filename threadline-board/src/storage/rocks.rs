//! RocksDB-backed board store.
//!
//! Column families:
//! - `documents` — the board document as LZ4-compressed JSON, one key
//! - `metadata`  — `BoardMetadata` (bincode: version, counts, sizes, times)
//!
//! Snapshot and metadata go out in one `WriteBatch`, so readers see both
//! or neither. RocksDB holds its own `LOCK` file and refuses a second
//! process, so the exclusive section only needs to serialize threads.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use threadline_core::Document;

use super::{decode_document, unix_now, CorruptionPolicy, ExclusiveGuard, Store, StoreError};

/// Column family names.
const CF_DOCUMENTS: &str = "documents";
const CF_METADATA: &str = "metadata";

/// All column family names for initialization.
const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_METADATA];

/// Key of the board document in both column families.
const BOARD_KEY: &[u8] = b"board";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct RocksStoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 32MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: true)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
    /// Reaction to an unreadable snapshot (default: fail)
    pub corruption_policy: CorruptionPolicy,
}

impl Default for RocksStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("threadline_data"),
            block_cache_size: 32 * 1024 * 1024, // 32MB
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024, // 16MB
            corruption_policy: CorruptionPolicy::Fail,
        }
    }
}

impl RocksStoreConfig {
    /// Create config for testing (small caches, no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024, // 8MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
            corruption_policy: CorruptionPolicy::Fail,
        }
    }
}

/// Metadata stored alongside the board snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardMetadata {
    /// Number of saves so far (monotonically increasing)
    pub version: u64,
    /// Top-level messages in the latest snapshot
    pub top_level_count: u64,
    /// Messages at every depth in the latest snapshot
    pub total_count: u64,
    /// Uncompressed snapshot size in bytes
    pub snapshot_size: u64,
    /// Compressed snapshot size in bytes
    pub compressed_size: u64,
    /// First save timestamp (seconds since epoch)
    pub created_at: u64,
    /// Last save timestamp (seconds since epoch)
    pub updated_at: u64,
}

impl BoardMetadata {
    fn new() -> Self {
        let now = unix_now();
        Self {
            version: 0,
            top_level_count: 0,
            total_count: 0,
            snapshot_size: 0,
            compressed_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::CorruptionError(format!("board metadata: {e}")))?;
        Ok(meta)
    }

    /// Compression ratio of the latest snapshot (raw / compressed).
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_size == 0 {
            return 0.0;
        }
        self.snapshot_size as f64 / self.compressed_size as f64
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// RocksDB-backed board store.
pub struct RocksStore {
    /// RocksDB instance (single-threaded mode; writers serialize on `writer`)
    db: DBWithThreadMode<SingleThreaded>,
    config: RocksStoreConfig,
    writer: Mutex<()>,
}

impl RocksStore {
    /// Open the store at the configured path.
    ///
    /// Creates the database and column families if they don't exist.
    pub fn open(config: RocksStoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened RocksDB store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            writer: Mutex::new(()),
        })
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str, config: &RocksStoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_DOCUMENTS => {
                // Values are LZ4-compressed already
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(2);
            }
            CF_METADATA => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    /// Metadata of the latest snapshot, `None` before the first save.
    pub fn metadata(&self) -> Result<Option<BoardMetadata>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(cf, BOARD_KEY)? {
            Some(bytes) => Ok(Some(BoardMetadata::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Force memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }
}

impl Store for RocksStore {
    fn load(&self) -> Result<Document, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let compressed = match self.db.get_cf(cf, BOARD_KEY)? {
            Some(bytes) => bytes,
            None => return Ok(Document::new()),
        };

        let origin = format!("{}[{CF_DOCUMENTS}]", self.config.path.display());
        match lz4_flex::decompress_size_prepended(&compressed) {
            Ok(json) => decode_document(&json, self.config.corruption_policy, &origin),
            Err(e) => match self.config.corruption_policy {
                CorruptionPolicy::Fail => Err(StoreError::CorruptionError(format!("{origin}: {e}"))),
                CorruptionPolicy::TreatAsEmpty => {
                    log::warn!("Data integrity: {origin} failed to decompress ({e}); treating as empty");
                    Ok(Document::new())
                }
            },
        }
    }

    fn save(&self, document: &Document) -> Result<(), StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let json = document
            .encode()
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        let compressed = lz4_flex::compress_prepend_size(&json);

        let mut meta = match self.metadata() {
            Ok(Some(meta)) => meta,
            Ok(None) => BoardMetadata::new(),
            Err(e) => {
                log::warn!("Discarding unreadable board metadata: {e}");
                BoardMetadata::new()
            }
        };
        meta.version += 1;
        meta.top_level_count = document.len() as u64;
        meta.total_count = document.total_messages() as u64;
        meta.snapshot_size = json.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        meta.updated_at = unix_now();

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_docs, BOARD_KEY, &compressed);
        batch.put_cf(cf_meta, BOARD_KEY, meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        log::trace!(
            "Saved board v{} ({} -> {} bytes)",
            meta.version,
            meta.snapshot_size,
            meta.compressed_size
        );
        Ok(())
    }

    fn exclusive(&self) -> Result<ExclusiveGuard<'_>, StoreError> {
        Ok(ExclusiveGuard::local(&self.writer))
    }

    fn kind(&self) -> &'static str {
        "rocksdb"
    }
}
