//! # LSM Storage Engine
//!
//! This module implements a **synchronous**, **crash-safe** LSM-tree storage engine
//! with multi-version concurrency, point and range tombstones, and pluggable
//! compaction strategies.
//!
//! ## Design Overview
//!
//! The engine organises data across three layers, queried newest-first:
//!
//! 1. **Active memtable** — an in-memory sorted map backed by a write-ahead log (WAL).
//! 2. **Frozen memtables** — read-only snapshots of previously active memtables,
//!    awaiting flush to persistent SSTables.
//! 3. **SSTables** — immutable, sorted, on-disk files with bloom filters and block
//!    indices for efficient point lookups and range scans.
//!
//! Writes go through the WAL first, then into the active memtable. When the
//! memtable exceeds [`EngineConfig::write_buffer_size`] it is frozen and a
//! fresh memtable + WAL is created. Frozen memtables are flushed to SSTables
//! via [`Engine::flush_oldest_frozen`] / [`Engine::flush_all_frozen`].
//!
//! ## Concurrency Model
//!
//! All engine state is protected by a single `Arc<RwLock<EngineInner>>`.
//! Reads acquire a **read lock**; writes and flushes acquire a **write lock**.
//! Compaction first acquires a short read lock to obtain the strategy, then
//! acquires a write lock for the merge/swap phase.
//!
//! ## Compaction
//!
//! Three compaction operations are exposed:
//!
//! - [`Engine::minor_compact`] — merges similarly-sized SSTables within a
//!   bucket, deduplicating point entries while preserving tombstones.
//! - [`Engine::tombstone_compact`] — rewrites a single high-tombstone-ratio
//!   SSTable, dropping provably-unnecessary tombstones.
//! - [`Engine::major_compact`] — merges *all* SSTables into one, actively
//!   applying range tombstones and dropping all spent tombstones.
//!
//! The concrete strategy implementations are selected via
//! [`EngineConfig::compaction_strategy`].
//!
//! ## Guarantees
//!
//! - **Durability:** Every write is persisted to WAL before acknowledgement.
//! - **Crash recovery:** On [`Engine::open`], the manifest, WALs, and SSTables
//!   are replayed to reconstruct the last durable state.
//! - **Multi-version reads:** Point lookups and scans always see the latest
//!   committed version of each key, respecting tombstones.
//! - **Atomic flushes:** Each frozen memtable is flushed to a single SSTable
//!   and the manifest is updated atomically.

use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::crypto::{Crypto, CryptoError, DEFAULT_CLASS};
use crate::manifest::{Manifest, ManifestError, ManifestSstEntry};
use crate::memtable::{FrozenMemtable, Memtable, MemtableError, MemtableGetResult};
use crate::sstable::{self, SSTable, SSTableError};

mod encoding_impls;
pub mod utils;
pub use utils::{NO_EXPIRY, PointEntry, RangeTombstone, Record, entry_checksum};

#[cfg(test)]
mod tests;

pub const MANIFEST_DIR: &str = "manifest";
pub const MEMTABLE_DIR: &str = "memtables";
pub const SSTABLE_DIR: &str = "sstables";
pub const MASTERKEY_FILE: &str = "MASTERKEY";
pub const LOCK_FILE: &str = "LOCK";

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the manifest subsystem.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Error originating from the memtable subsystem.
    #[error("Memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Error originating from the SSTable subsystem.
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    /// Error originating from the crypto subsystem.
    #[error("Crypto error: {0}")]
    CryptoFailure(#[from] CryptoError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested key does not exist.
    #[error("key not found")]
    NotFound,

    /// Another handle already holds the data directory's lock file.
    #[error("data directory already open by another engine instance")]
    AlreadyOpen,

    /// A data block failed its checksum during a scan or point lookup.
    #[error("corrupted block in SSTable")]
    CorruptedBlock,

    /// A WAL record failed its checksum during replay.
    #[error("corrupted WAL record")]
    CorruptedWAL,

    /// An SSTable's footer or index failed validation on open.
    #[error("corrupted SSTable: {0}")]
    CorruptedSST(String),

    /// Caller-supplied argument violates an engine invariant (oversized
    /// value, empty key, inverted scan range, etc).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A configured resource limit was exceeded.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Operation attempted after the engine was closed.
    #[error("engine is shut down")]
    Shutdown,

    /// Internal invariant violation (poisoned lock, unexpected state, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration for an [`Engine`] instance.
///
/// Controls memtable sizing, compaction strategy selection, and all
/// compaction-related thresholds. Passed to [`Engine::open`].
pub struct EngineConfig {
    /// Max memtable size (bytes) before freeze.
    pub write_buffer_size: usize,

    /// Compaction strategy to use for this engine instance.
    ///
    /// Determines which [`CompactionStrategy`](crate::compaction::CompactionStrategy)
    /// implementations back the `minor_compact`, `tombstone_compact`, and
    /// `major_compact` methods.
    pub compaction_strategy: crate::compaction::CompactionStrategyType,

    /// Lower bound multiplier for bucket size range ([avg × bucket_low, avg × bucket_high]).
    pub bucket_low: f64,

    /// Upper bound multiplier for bucket size range.
    pub bucket_high: f64,

    /// Min size (bytes) for regular buckets; smaller SSTables go to the "small" bucket.
    pub min_sstable_size: usize,

    /// Min SSTables in a bucket to trigger minor compaction.
    pub min_threshold: usize,

    /// Max SSTables to compact at once in minor compaction.
    pub max_threshold: usize,

    /// Ratio of tombstones to total records to trigger tombstone compaction.
    pub tombstone_ratio_threshold: f64,

    /// Min SSTable age (seconds) before eligible for tombstone compaction.
    pub tombstone_compaction_interval: usize,

    /// When true, tombstone compaction resolves bloom filter false positives
    /// by doing an actual `get()` on other SSTables for point tombstones.
    pub tombstone_bloom_fallback: bool,

    /// When true, tombstone compaction will scan older SSTables to check
    /// whether a range tombstone still covers any live keys, allowing
    /// aggressive range tombstone removal.
    pub tombstone_range_drop: bool,

    /// Thread pool size for flushing memtables and compactions.
    ///
    /// Kept as a config-surface knob; flush and compaction currently run
    /// synchronously on the calling thread (see `DESIGN.md`).
    pub thread_pool_size: usize,

    /// Master encryption key. If `None`, [`Engine::open`] reads the
    /// existing `MASTERKEY` file in the data directory, or generates and
    /// persists a fresh one on first open.
    pub encryption_key: Option<[u8; 32]>,

    /// Fsync the active WAL after every write. When `false`, durability
    /// still comes from the fsync performed when a memtable is frozen —
    /// only writes since the last freeze are at risk on an unclean crash.
    pub sync_on_write: bool,

    /// Reject `put`/`put_with_ttl` values larger than this many bytes
    /// with `EngineError::InvalidInput`.
    pub max_value_size: usize,

    /// L0-file-count compaction trigger, kept for config-surface
    /// compatibility with leveled-compaction deployments. This engine
    /// runs STCS; `min_threshold` is the knob that actually drives
    /// compaction timing.
    pub l0_trigger: usize,

    /// Per-level size growth factor, kept for config-surface
    /// compatibility with leveled-compaction deployments. Unused by STCS.
    pub level_multiplier: f64,

    /// SSTable data block size in bytes, kept for config-surface
    /// compatibility. The current SSTable writer does not yet chunk
    /// entries into independently-addressable blocks of this size.
    pub block_size: usize,

    /// Bloom filter bits-per-key, kept for config-surface compatibility.
    /// The current SSTable writer sizes its bloom filter from the entry
    /// count at a fixed false-positive rate rather than this knob.
    pub bloom_bits_per_key: usize,

    /// Number of worker threads available for background compaction,
    /// kept for config-surface compatibility (see `thread_pool_size`).
    pub compaction_workers: usize,

    /// WAL file rotation threshold in bytes, kept for config-surface
    /// compatibility. WAL rotation is currently driven by
    /// `write_buffer_size` via memtable freezing.
    pub wal_rotate_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: 4 * 1024 * 1024,
            compaction_strategy: crate::compaction::CompactionStrategyType::Stcs,
            bucket_low: 0.5,
            bucket_high: 1.5,
            min_sstable_size: 1024,
            min_threshold: 4,
            max_threshold: 32,
            tombstone_ratio_threshold: 0.2,
            tombstone_compaction_interval: 3600,
            tombstone_bloom_fallback: false,
            tombstone_range_drop: false,
            thread_pool_size: 2,
            encryption_key: None,
            sync_on_write: false,
            max_value_size: 4 * 1024 * 1024,
            l0_trigger: 4,
            level_multiplier: 10.0,
            block_size: 4096,
            bloom_bits_per_key: 10,
            compaction_workers: 2,
            wal_rotate_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
pub struct EngineStats {
    /// Number of frozen memtables pending flush.
    pub frozen_count: usize,
    /// Total number of SSTables on disk.
    pub sstables_count: usize,
    /// Sum of all SSTable file sizes in bytes.
    pub total_sst_size_bytes: u64,
    /// Per-SSTable file sizes in bytes (newest-first order).
    pub sst_sizes: Vec<u64>,
    /// Number of SSTables holding at least one Put whose `expires_at` has
    /// already elapsed. Non-zero means compaction hasn't yet reclaimed
    /// space a TTL already freed — informational only, does not trigger
    /// compaction itself.
    pub sstables_with_expired_data: usize,
}

/// Current Unix-epoch time in milliseconds, used for TTL expiry checks.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Builds the AAD binding a ciphertext to its key version and logical key.
pub(crate) fn value_aad(key_version: u32, key: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(4 + key.len());
    aad.extend_from_slice(&key_version.to_le_bytes());
    aad.extend_from_slice(key);
    aad
}

/// Encrypts a plaintext value under the classification's current key
/// version. Returns `(nonce, ciphertext, key_version)`.
pub(crate) fn encrypt_value(
    crypto: &Crypto,
    key: &[u8],
    value: &[u8],
) -> Result<(Vec<u8>, Vec<u8>, u32), EngineError> {
    let key_version = crypto.current_version(DEFAULT_CLASS);
    let aad = value_aad(key_version, key);
    let (nonce, ciphertext) = crypto.encrypt(DEFAULT_CLASS, key_version, value, &aad)?;
    Ok((nonce, ciphertext, key_version))
}

/// Decrypts a stored ciphertext, re-deriving the subkey for the version
/// it was written under.
pub(crate) fn decrypt_value(
    crypto: &Crypto,
    key: &[u8],
    key_version: u32,
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, EngineError> {
    let aad = value_aad(key_version, key);
    Ok(crypto.decrypt(DEFAULT_CLASS, key_version, nonce, ciphertext, &aad)?)
}

struct EngineInner {
    /// Persistent manifest for this engine (keeps track of SSTables, generations, etc).
    manifest: Manifest,

    /// Active memtable that accepts writes.
    active: Memtable,

    /// Frozen memtables waiting to be flushed to SSTable.
    /// We keep them in memory for reads until flush completes.
    frozen: Vec<FrozenMemtable>,

    /// Loaded SSTables.
    sstables: Vec<SSTable>,

    /// Path where engine will be mounted.
    data_dir: String,

    /// A short config for thresholds, sizes, etc.
    config: EngineConfig,

    /// Envelope encryption: derives per-version subkeys from the master key.
    crypto: Arc<Crypto>,

    /// Exclusive lock file, held open for the engine's lifetime. Dropping
    /// it (on `close`) releases the lock and removes the file.
    _lock_file: fs::File,

    /// Set by `close()`. Once `true`, every public operation returns
    /// `EngineError::Shutdown` instead of touching the WAL or SSTables.
    closed: bool,
}

/// In-memory inputs for a flush, captured while holding the engine lock.
/// Carries no open file handles, so it can cross a lock release/reacquire.
struct PreparedFlush {
    frozen_wal_id: u64,
    point_entries: Vec<PointEntry>,
    range_tombstones: Vec<RangeTombstone>,
    sstable_id: u64,
    sstable_path: String,
}

/// Output of building a flush's SSTable file, ready to be spliced into
/// `EngineInner` under a freshly reacquired lock.
struct BuiltFlush {
    frozen_wal_id: u64,
    sstable_id: u64,
    sstable_path: String,
    min_expires_at: u64,
}

impl Drop for EngineInner {
    /// Best-effort lock release for handles dropped without `close()`.
    ///
    /// Already-written entries are durable via the WAL regardless of
    /// `close()`; this only unblocks a later `Engine::open` on the same
    /// directory. No flush or fsync runs here — reopening replays the WAL.
    fn drop(&mut self) {
        let lock_path = format!("{}/{}", self.data_dir, LOCK_FILE);
        let _ = fs::remove_file(&lock_path);
    }
}

/// The main LSM storage engine handle.
///
/// Thread-safe — can be cloned and shared across threads via the
/// internal `Arc<RwLock<_>>`.
pub struct Engine {
    inner: Arc<RwLock<EngineInner>>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let closed = self.inner.read().map(|inner| inner.closed).unwrap_or(true);
        f.debug_struct("Engine").field("closed", &closed).finish()
    }
}

impl Engine {
    /// Rejects configurations that would leave the engine in a nonsensical
    /// or pathological state before any directory or file is touched.
    fn validate_config(config: &EngineConfig) -> Result<(), EngineError> {
        const WRITE_BUFFER_MAX: usize = 256 * 1024 * 1024;
        const MIN_THRESHOLD_MAX: usize = 64;
        const MAX_THRESHOLD_MAX: usize = 256;
        const TOMBSTONE_INTERVAL_MAX: usize = 604_800; // 7 days, in seconds
        const THREAD_POOL_MAX: usize = 32;

        if !(1024..=WRITE_BUFFER_MAX).contains(&config.write_buffer_size) {
            return Err(EngineError::InvalidInput(format!(
                "write_buffer_size must be in [1024, {WRITE_BUFFER_MAX}] bytes"
            )));
        }
        if !(2..=MIN_THRESHOLD_MAX).contains(&config.min_threshold) {
            return Err(EngineError::InvalidInput(format!(
                "min_threshold must be in [2, {MIN_THRESHOLD_MAX}]"
            )));
        }
        if config.max_threshold < config.min_threshold || config.max_threshold > MAX_THRESHOLD_MAX
        {
            return Err(EngineError::InvalidInput(format!(
                "max_threshold must be in [min_threshold, {MAX_THRESHOLD_MAX}]"
            )));
        }
        if !(config.tombstone_ratio_threshold > 0.0 && config.tombstone_ratio_threshold <= 1.0) {
            return Err(EngineError::InvalidInput(
                "tombstone_ratio_threshold must be in (0.0, 1.0]".into(),
            ));
        }
        if config.tombstone_compaction_interval > TOMBSTONE_INTERVAL_MAX {
            return Err(EngineError::InvalidInput(format!(
                "tombstone_compaction_interval must be <= {TOMBSTONE_INTERVAL_MAX} seconds"
            )));
        }
        if !(1..=THREAD_POOL_MAX).contains(&config.thread_pool_size) {
            return Err(EngineError::InvalidInput(format!(
                "thread_pool_size must be in [1, {THREAD_POOL_MAX}]"
            )));
        }
        Ok(())
    }

    /// Opens (or creates) an engine rooted at the given directory.
    ///
    /// On a fresh directory the manifest, WAL, and SSTable sub-directories
    /// are created automatically. On an existing directory the manifest is
    /// replayed, frozen WALs are loaded, and SSTables are opened.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        Self::validate_config(&config)?;

        // 0. Create necessary directories
        let path_str = path.as_ref().to_string_lossy();
        let manifest_dir = format!("{}/{}", path_str, MANIFEST_DIR);
        let memtable_dir = format!("{}/{}", path_str, MEMTABLE_DIR);
        let sstable_dir = format!("{}/{}", path_str, SSTABLE_DIR);

        fs::create_dir_all(&manifest_dir)?;
        fs::create_dir_all(&memtable_dir)?;
        fs::create_dir_all(&sstable_dir)?;

        // Acquire the exclusive lock file — refuse to open a data directory
        // that's already mounted by another `Engine` instance.
        let lock_path = format!("{}/{}", path_str, LOCK_FILE);
        let lock_file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    EngineError::AlreadyOpen
                } else {
                    EngineError::Io(e)
                }
            })?;

        let crypto = Arc::new(Self::load_or_init_crypto(&path_str, &config)?);

        // 1. Load or create manifest.
        let manifest_path = format!("{}/{}", path.as_ref().to_string_lossy(), MANIFEST_DIR);
        let manifest = Manifest::open(&manifest_path)?;
        let manifest_last_lsn = manifest.get_last_lsn()?;

        // 2. Discover existing WAL files and load active/frozen WAL info from manifest.
        let active_wal_nr = manifest.get_active_wal()?;
        let active_wal_path = format!(
            "{}/{}/wal-{:06}.log",
            path.as_ref().to_string_lossy(),
            MEMTABLE_DIR,
            active_wal_nr
        );
        let memtable = Memtable::new(active_wal_path, None, config.write_buffer_size)?;

        let frozen_wals = manifest.get_frozen_wals()?;
        let mut frozen_memtables = Vec::new();
        for wal_nr in frozen_wals {
            let frozen_wal_path = format!(
                "{}/{}/wal-{:06}.log",
                path.as_ref().to_string_lossy(),
                MEMTABLE_DIR,
                wal_nr
            );
            let memtable = Memtable::new(frozen_wal_path, None, config.write_buffer_size)?;
            frozen_memtables.push(memtable.frozen()?);
        }

        // 3. Discover existing SSTables on disk and remove orphans.
        let sstables = manifest.get_sstables()?;

        for entry in fs::read_dir(&sstable_dir)? {
            let entry = entry?;
            let file_path = entry.path();

            if file_path.is_file()
                && file_path.extension().and_then(|s| s.to_str()) == Some("sst")
                && let Some(file_name) = file_path.file_name().and_then(|s| s.to_str())
                && let Some(id) = file_name
                    .strip_prefix("sstable-")
                    .and_then(|s| s.strip_suffix(".sst"))
                    .and_then(|s| s.parse::<u64>().ok())
                && !sstables.iter().any(|entry| entry.id == id)
            {
                fs::remove_file(&file_path)?;
            }
        }

        // 4. Load SSTables from manifest. A single corrupted file (e.g. a
        // footer checksum mismatch) is logged and skipped rather than
        // failing the whole open — the engine can still serve whatever
        // data the WAL and the remaining SSTables provide.
        let mut sstable_handles = Vec::new();
        for sstable_entry in sstables {
            match SSTable::open(&sstable_entry.path) {
                Ok(mut sstable) => {
                    sstable.id = sstable_entry.id;
                    sstable_handles.push(sstable);
                }
                Err(e) => {
                    tracing::error!(
                        id = sstable_entry.id,
                        path = %sstable_entry.path.display(),
                        error = %e,
                        "skipping corrupted SSTable during open"
                    );
                }
            }
        }

        // 5. Compute max LSN in active memtable.
        let mut max_lsn = manifest_last_lsn;

        if memtable.max_lsn() > max_lsn {
            max_lsn = memtable.max_lsn();
        }

        for frozen in frozen_memtables.iter() {
            if frozen.max_lsn() > max_lsn {
                max_lsn = frozen.max_lsn();
            }
        }

        for sstable in sstable_handles.iter() {
            if sstable.properties.max_lsn > max_lsn {
                max_lsn = sstable.properties.max_lsn;
            }
        }

        if memtable.max_lsn() != max_lsn {
            memtable.inject_max_lsn(max_lsn + 1);
        }

        // Sort frozen memtables by WAL sequence number, newest first.
        // We use wal_seq rather than creation_timestamp because on crash
        // recovery all frozen are replayed at nearly the same instant,
        // making timestamps unreliable for ordering.
        frozen_memtables.sort_by(|a, b| b.memtable.wal.wal_seq().cmp(&a.memtable.wal.wal_seq()));

        // Sort SSTables by max_lsn descending.  This lets get()
        // early-terminate: once we find a result at LSN L, any SSTable
        // whose max_lsn ≤ L cannot contain a newer version of any key.
        sstable_handles.sort_by(|a, b| b.properties.max_lsn.cmp(&a.properties.max_lsn));

        let inner = EngineInner {
            manifest,
            active: memtable,
            frozen: frozen_memtables,
            sstables: sstable_handles,
            data_dir: path.as_ref().to_string_lossy().to_string(),
            config,
            crypto,
            _lock_file: lock_file,
            closed: false,
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
        })
    }

    /// Loads the master key from `config.encryption_key`, falling back to
    /// the `MASTERKEY` file in the data directory, generating and
    /// persisting a fresh key on first open.
    fn load_or_init_crypto(path_str: &str, config: &EngineConfig) -> Result<Crypto, EngineError> {
        if let Some(key) = config.encryption_key {
            return Ok(Crypto::new(key));
        }

        let masterkey_path = format!("{}/{}", path_str, MASTERKEY_FILE);
        match fs::read(&masterkey_path) {
            Ok(bytes) => Ok(Crypto::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let crypto = Crypto::generate();
                fs::write(&masterkey_path, crypto.master_key())?;
                Ok(crypto)
            }
            Err(e) => Err(EngineError::Io(e)),
        }
    }

    /// Gracefully shuts down the engine.
    ///
    /// Flushes all remaining frozen memtables, checkpoints the manifest,
    /// and fsyncs all directories to ensure full durability.
    pub fn close(&self) -> Result<(), EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        if inner.closed {
            return Ok(());
        }

        // 1. Flush any remaining frozen memtables to SSTables
        while !inner.frozen.is_empty() {
            Self::flush_frozen_to_sstable_inner(&mut inner)?;
        }

        // 2. Checkpoint the manifest to create a snapshot
        let max_lsn = inner.active.max_lsn();
        inner.manifest.update_lsn(max_lsn)?;
        inner.manifest.checkpoint()?;

        // 3. Fsync directories to ensure metadata is durable
        let manifest_dir = format!("{}/{}", inner.data_dir, MANIFEST_DIR);
        let memtable_dir = format!("{}/{}", inner.data_dir, MEMTABLE_DIR);
        let sstable_dir = format!("{}/{}", inner.data_dir, SSTABLE_DIR);

        // Fsync each directory
        for dir_path in [&manifest_dir, &memtable_dir, &sstable_dir] {
            if let Ok(dir) = fs::File::open(dir_path) {
                dir.sync_all()?;
            }
        }

        // 4. Fsync the root data directory
        if let Ok(root) = fs::File::open(&inner.data_dir) {
            root.sync_all()?;
        }

        // 5. Release the lock file so the data directory can be reopened.
        let lock_path = format!("{}/{}", inner.data_dir, LOCK_FILE);
        let _ = fs::remove_file(&lock_path);

        inner.closed = true;

        Ok(())
    }

    /// Insert a key-value pair with no expiry.
    ///
    /// Returns `Ok(true)` if the active memtable was frozen (caller should
    /// arrange a flush), `Ok(false)` otherwise.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<bool, EngineError> {
        self.put_with_ttl(key, value, None)
    }

    /// Insert a key-value pair that expires `ttl` after now, or never if
    /// `ttl` is `None`.
    ///
    /// The value is encrypted before it reaches the memtable/WAL; plaintext
    /// never touches disk. Returns `Ok(true)` if the active memtable was
    /// frozen, `Ok(false)` otherwise.
    pub fn put_with_ttl(
        &self,
        key: Vec<u8>,
        value: Vec<u8>,
        ttl: Option<std::time::Duration>,
    ) -> Result<bool, EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        if inner.closed {
            return Err(EngineError::Shutdown);
        }

        if key.is_empty() {
            return Err(EngineError::InvalidInput("key must not be empty".into()));
        }
        if value.len() > inner.config.max_value_size {
            return Err(EngineError::ResourceExhausted(format!(
                "value of {} bytes exceeds max_value_size of {} bytes",
                value.len(),
                inner.config.max_value_size
            )));
        }

        let expires_at = match ttl {
            Some(d) => now_millis() + d.as_millis() as u64,
            None => NO_EXPIRY,
        };
        let (nonce, ciphertext, key_version) = encrypt_value(&inner.crypto, &key, &value)?;

        match inner
            .active
            .put(key.clone(), ciphertext.clone(), nonce.clone(), expires_at, key_version)
        {
            Ok(()) => Ok(false),

            Err(MemtableError::FlushRequired) => {
                Self::freeze_active(&mut inner)?;
                inner
                    .active
                    .put(key, ciphertext, nonce, expires_at, key_version)?;

                let max_lsn = inner.active.max_lsn();
                inner.manifest.update_lsn(max_lsn)?;

                Ok(true)
            }

            Err(e) => Err(e.into()),
        }
    }

    /// Delete a key (insert a point tombstone).
    ///
    /// Returns `Ok(true)` if the active memtable was frozen, `Ok(false)` otherwise.
    pub fn delete(&self, key: Vec<u8>) -> Result<bool, EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        if inner.closed {
            return Err(EngineError::Shutdown);
        }
        if key.is_empty() {
            return Err(EngineError::InvalidInput("key must not be empty".into()));
        }

        match inner.active.delete(key.clone()) {
            Ok(()) => Ok(false),

            Err(MemtableError::FlushRequired) => {
                Self::freeze_active(&mut inner)?;
                inner.active.delete(key)?;

                let max_lsn = inner.active.max_lsn();
                inner.manifest.update_lsn(max_lsn)?;

                Ok(true)
            }

            Err(e) => Err(e.into()),
        }
    }

    /// Delete all keys in `[start_key, end_key)` (insert a range tombstone).
    ///
    /// Returns `Ok(true)` if the active memtable was frozen, `Ok(false)` otherwise.
    pub fn delete_range(&self, start_key: Vec<u8>, end_key: Vec<u8>) -> Result<bool, EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        if inner.closed {
            return Err(EngineError::Shutdown);
        }
        if start_key.is_empty() || end_key.is_empty() {
            return Err(EngineError::InvalidInput(
                "start_key and end_key must not be empty".into(),
            ));
        }
        if start_key >= end_key {
            return Err(EngineError::InvalidInput(
                "start_key must be strictly less than end_key".into(),
            ));
        }

        match inner
            .active
            .delete_range(start_key.clone(), end_key.clone())
        {
            Ok(()) => Ok(false),

            Err(MemtableError::FlushRequired) => {
                Self::freeze_active(&mut inner)?;
                inner.active.delete_range(start_key, end_key)?;

                let max_lsn = inner.active.max_lsn();
                inner.manifest.update_lsn(max_lsn)?;

                Ok(true)
            }

            Err(e) => Err(e.into()),
        }
    }

    /// Look up a single key.
    ///
    /// Returns `Ok(Some(value))` if the key exists, `Ok(None)` if it has
    /// been deleted or was never written, or `Err` on I/O failure.
    ///
    /// The lookup order is: active memtable → frozen memtables → SSTables
    /// (all newest-first). The first definitive result wins.
    pub fn get(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        if inner.closed {
            return Err(EngineError::Shutdown);
        }
        if key.is_empty() {
            return Err(EngineError::InvalidInput("key must not be empty".into()));
        }

        let now = now_millis();

        // --------------------------------------------------
        // 1. Active memtable (newest)
        // --------------------------------------------------
        match inner.active.get(&key)? {
            MemtableGetResult::Put {
                value,
                nonce,
                expires_at,
                key_version,
            } => {
                if expires_at != NO_EXPIRY && now >= expires_at {
                    return Ok(None);
                }
                return decrypt_value(&inner.crypto, &key, key_version, &nonce, &value).map(Some);
            }
            MemtableGetResult::Delete | MemtableGetResult::RangeDelete => return Ok(None),
            MemtableGetResult::NotFound => {}
        }

        // --------------------------------------------------
        // 2. Frozen memtables (newest → oldest)
        // --------------------------------------------------
        for frozen in &inner.frozen {
            match frozen.get(&key)? {
                MemtableGetResult::Put {
                    value,
                    nonce,
                    expires_at,
                    key_version,
                } => {
                    if expires_at != NO_EXPIRY && now >= expires_at {
                        return Ok(None);
                    }
                    return decrypt_value(&inner.crypto, &key, key_version, &nonce, &value)
                        .map(Some);
                }
                MemtableGetResult::Delete | MemtableGetResult::RangeDelete => {
                    return Ok(None);
                }
                MemtableGetResult::NotFound => {}
            }
        }

        // --------------------------------------------------
        // 3. SSTables (sorted by max_lsn descending)
        //
        //    After size-tiered compaction, a merged SSTable may
        //    span a wide LSN range. We track the best (highest-LSN)
        //    result found so far. Once an SSTable's max_lsn is ≤
        //    the best LSN, no subsequent SSTable can beat it, so
        //    we break early.
        // --------------------------------------------------
        let mut best_sst: Option<sstable::GetResult> = None;
        let mut best_lsn: u64 = 0;

        for sst in &inner.sstables {
            // Early termination: this SSTable (and all after it) have
            // max_lsn ≤ best_lsn, so they can't contain a newer version.
            if sst.properties.max_lsn <= best_lsn {
                break;
            }

            match sst.get(&key)? {
                sstable::GetResult::NotFound => {}
                result => {
                    let lsn = result.lsn();
                    if lsn > best_lsn {
                        best_lsn = lsn;
                        best_sst = Some(result);
                    }
                }
            }
        }

        match best_sst {
            Some(sstable::GetResult::Put {
                value,
                nonce,
                expires_at,
                key_version,
                ..
            }) => {
                if expires_at != NO_EXPIRY && now >= expires_at {
                    Ok(None)
                } else {
                    decrypt_value(&inner.crypto, &key, key_version, &nonce, &value).map(Some)
                }
            }
            Some(sstable::GetResult::Delete { .. } | sstable::GetResult::RangeDelete { .. }) => {
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Returns `true` if the key exists, is unexpired, and is not covered
    /// by a point or range tombstone.
    pub fn has(&self, key: Vec<u8>) -> Result<bool, EngineError> {
        Ok(self.get(key)?.is_some())
    }

    /// Starts a buffered, atomically-committed batch of writes.
    ///
    /// See [`crate::batch::BatchWriter`].
    pub fn batch(&self) -> crate::batch::BatchWriter {
        crate::batch::BatchWriter::new(self.clone())
    }

    /// Encrypts and applies a batch of buffered operations as a single
    /// WAL-atomic unit, freezing the active memtable first if the batch
    /// doesn't fit in the remaining write buffer.
    pub(crate) fn commit_batch(
        &self,
        ops: Vec<crate::batch::PendingOp>,
    ) -> Result<(), EngineError> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        if inner.closed {
            return Err(EngineError::Shutdown);
        }

        let mut batch_ops = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                crate::batch::PendingOp::Put { key, value, ttl } => {
                    if key.is_empty() {
                        return Err(EngineError::InvalidInput("key must not be empty".into()));
                    }
                    if value.len() > inner.config.max_value_size {
                        return Err(EngineError::ResourceExhausted(format!(
                            "value of {} bytes exceeds max_value_size of {} bytes",
                            value.len(),
                            inner.config.max_value_size
                        )));
                    }
                    let expires_at = match ttl {
                        Some(d) => now_millis() + d.as_millis() as u64,
                        None => NO_EXPIRY,
                    };
                    let (nonce, ciphertext, key_version) =
                        encrypt_value(&inner.crypto, &key, &value)?;
                    batch_ops.push(crate::memtable::BatchOp::Put {
                        key,
                        value: ciphertext,
                        nonce,
                        expires_at,
                        key_version,
                    });
                }
                crate::batch::PendingOp::Delete { key } => {
                    batch_ops.push(crate::memtable::BatchOp::Delete { key });
                }
                crate::batch::PendingOp::DeleteRange { start, end } => {
                    batch_ops.push(crate::memtable::BatchOp::RangeDelete { start, end });
                }
            }
        }

        match inner.active.apply_batch(batch_ops.clone()) {
            Ok(()) => {}
            Err(MemtableError::FlushRequired) => {
                Self::freeze_active(&mut inner)?;
                inner.active.apply_batch(batch_ops)?;
            }
            Err(e) => return Err(e.into()),
        }

        let max_lsn = inner.active.max_lsn();
        inner.manifest.update_lsn(max_lsn)?;

        Ok(())
    }

    /// Scan all live key-value pairs in `[start_key, end_key)`.
    ///
    /// Returns an iterator of `(key, value)` pairs, merging entries from
    /// all layers and applying point/range tombstones to filter out
    /// deleted keys.
    pub fn scan(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> Result<impl Iterator<Item = (Vec<u8>, Vec<u8>)>, EngineError> {
        let crypto = {
            let inner = self
                .inner
                .read()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            if inner.closed {
                return Err(EngineError::Shutdown);
            }
            Arc::clone(&inner.crypto)
        };
        let merged = self.raw_scan(start_key, end_key)?;
        Ok(VisibilityFilter::new(merged, crypto))
    }

    /// Returns up to `limit` live keys in ascending order, starting after
    /// the `offset`-th key of the full keyspace. Used for cursor-free
    /// pagination over the whole engine.
    pub fn keys_page(&self, offset: usize, limit: usize) -> Result<Vec<Vec<u8>>, EngineError> {
        // Practical upper bound on key length for a "scan everything" pass;
        // any real key sorts below this many 0xFF bytes.
        let max_bound = [0xFFu8; 4096];
        let keys = self
            .scan(&[], &max_bound)?
            .skip(offset)
            .take(limit)
            .map(|(k, _)| k)
            .collect();
        Ok(keys)
    }

    fn raw_scan(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> Result<utils::MergeIterator<'static>, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        let mut iters: Vec<Box<dyn Iterator<Item = Record>>> = Vec::new();

        fn point_entry_to_record(key: Vec<u8>, point: PointEntry) -> Record {
            Record::Put {
                key,
                value: point.value.expect("scan() only yields entries with a value"),
                lsn: point.lsn,
                timestamp: point.timestamp,
                nonce: point.nonce,
                expires_at: point.expires_at,
                key_version: point.key_version,
                checksum: point.checksum,
            }
        }

        // Active memtable - collect to own the data
        let active_records: Vec<_> = inner
            .active
            .scan(start_key, end_key)?
            .map(|(key, point)| point_entry_to_record(key, point))
            .collect();
        iters.push(Box::new(active_records.into_iter()));

        // Frozen memtables - collect to own the data
        for frozen in &inner.frozen {
            let records: Vec<_> = frozen
                .scan(start_key, end_key)?
                .map(|(key, point)| point_entry_to_record(key, point))
                .collect();
            iters.push(Box::new(records.into_iter()));
        }

        // SSTables - collect to own the data
        for sstable in &inner.sstables {
            let records: Vec<_> = sstable.scan(start_key, end_key)?.collect();
            iters.push(Box::new(records.into_iter()));
        }

        Ok(utils::MergeIterator::new(iters))
    }

    /// Returns a snapshot of engine statistics.
    ///
    /// Includes frozen memtable count, SSTable count, per-SSTable file
    /// sizes, and total on-disk SSTable size.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        let sst_sizes: Vec<u64> = inner.sstables.iter().map(|s| s.file_size()).collect();
        let total_sst_size_bytes: u64 = sst_sizes.iter().sum();

        let now = now_millis();
        let sstables_with_expired_data = inner
            .manifest
            .get_sstables()?
            .iter()
            .filter(|e| e.min_expires_at != crate::manifest::NO_EXPIRY && e.min_expires_at <= now)
            .count();

        Ok(EngineStats {
            frozen_count: inner.frozen.len(),
            sstables_count: inner.sstables.len(),
            total_sst_size_bytes,
            sst_sizes,
            sstables_with_expired_data,
        })
    }

    /// Freeze the current active memtable and swap in a fresh one.
    /// The old memtable is pushed to the front of `inner.frozen`.
    fn freeze_active(inner: &mut EngineInner) -> Result<(), EngineError> {
        let frozen_wal_id = inner.active.wal.wal_seq();
        let current_max_lsn = inner.active.max_lsn();
        let new_active_wal_id = frozen_wal_id + 1;

        let new_active = Memtable::new(
            format!(
                "{}/{}/wal-{:06}.log",
                inner.data_dir, MEMTABLE_DIR, new_active_wal_id
            ),
            None,
            inner.config.write_buffer_size,
        )?;

        let old_active = std::mem::replace(&mut inner.active, new_active);
        let frozen = old_active.frozen()?;
        // Insert at beginning to maintain sorted order (newest first)
        inner.frozen.insert(0, frozen);

        // Ensure LSN continuity
        inner.active.inject_max_lsn(current_max_lsn);

        inner.manifest.add_frozen_wal(frozen_wal_id)?;
        inner.manifest.set_active_wal(new_active_wal_id)?;

        Ok(())
    }

    /// Flush the oldest frozen memtable to a new SSTable.
    ///
    /// The SSTable file is built and reopened without holding the engine
    /// lock — only the in-memory memtable drain and the final splice into
    /// `sstables`/the manifest run under `self.inner.write()`. This keeps
    /// concurrent `get`/`scan` callers from blocking for the duration of
    /// the flush's disk I/O.
    ///
    /// Returns `Ok(true)` if a frozen memtable was flushed, `Ok(false)` if
    /// there were no frozen memtables to flush.
    pub fn flush_oldest_frozen(&self) -> Result<bool, EngineError> {
        let prepared = {
            let mut inner = self
                .inner
                .write()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            match Self::prepare_frozen_flush(&mut inner)? {
                Some(prepared) => prepared,
                None => return Ok(false),
            }
        };

        let (sstable, built) = Self::build_flush_sstable(prepared)?;

        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        Self::splice_flushed_sstable(&mut inner, sstable, built)?;
        Ok(true)
    }

    /// Flush **all** frozen memtables to SSTables.
    ///
    /// Each memtable is flushed via [`Self::flush_oldest_frozen`], so the
    /// lock is released between flushes rather than held across the whole
    /// batch.
    ///
    /// Returns the number of frozen memtables that were flushed.
    pub fn flush_all_frozen(&self) -> Result<usize, EngineError> {
        let mut count = 0usize;
        while self.flush_oldest_frozen()? {
            count += 1;
        }
        Ok(count)
    }

    /// Allocates the next unique SSTable ID from the manifest's monotonic counter.
    fn next_sstable_id(inner: &mut EngineInner) -> Result<u64, EngineError> {
        Ok(inner.manifest.allocate_sst_id()?)
    }

    /// Flushes the oldest frozen memtable in one step, lock held throughout.
    ///
    /// Used by [`Self::close`], which already holds `self.inner.write()`
    /// for the whole shutdown sequence and blocks new callers regardless —
    /// splitting the build out from under the lock buys nothing there.
    /// [`Self::flush_oldest_frozen`] uses the split
    /// prepare/build/splice path below instead, so a foreground flush
    /// doesn't hold the lock across SSTable-build I/O.
    fn flush_frozen_to_sstable_inner(inner: &mut EngineInner) -> Result<(), EngineError> {
        let prepared = match Self::prepare_frozen_flush(inner)? {
            Some(prepared) => prepared,
            None => return Ok(()),
        };
        let (sstable, built) = Self::build_flush_sstable(prepared)?;
        Self::splice_flushed_sstable(inner, sstable, built)
    }

    /// Pops the oldest frozen memtable (last in the newest-first vec — we
    /// flush oldest first so `insert(0, sstable)` keeps `sstables` sorted
    /// newest-first after a batch flush) and collects its records into the
    /// point/range-tombstone split an SSTable needs. Also allocates the
    /// destination SSTable's id and path. Everything here is in-memory or a
    /// single manifest id allocation — no SSTable-build I/O.
    fn prepare_frozen_flush(inner: &mut EngineInner) -> Result<Option<PreparedFlush>, EngineError> {
        let frozen = match inner.frozen.pop() {
            Some(frozen) => frozen,
            None => return Ok(None),
        };
        let frozen_wal_id = frozen.memtable.wal.wal_seq();

        let records: Vec<_> = frozen.iter_for_flush()?.collect();

        let mut point_entries = Vec::new();
        let mut range_tombstones = Vec::new();

        for record in records {
            match record {
                Record::Put {
                    key,
                    value,
                    lsn,
                    timestamp,
                    nonce,
                    expires_at,
                    key_version,
                    checksum,
                } => {
                    point_entries.push(PointEntry::new(
                        key,
                        value,
                        lsn,
                        timestamp,
                        nonce,
                        expires_at,
                        key_version,
                        checksum,
                    ));
                }
                Record::Delete {
                    key,
                    lsn,
                    timestamp,
                    checksum,
                } => {
                    point_entries.push(PointEntry::new_delete(key, lsn, timestamp, checksum));
                }
                Record::RangeDelete {
                    start,
                    end,
                    lsn,
                    timestamp,
                } => {
                    range_tombstones.push(RangeTombstone::new(start, end, lsn, timestamp));
                }
                Record::BatchCommit { .. } => {
                    unreachable!("BatchCommit never reaches flush")
                }
            }
        }

        let sstable_id = Self::next_sstable_id(inner)?;
        let sstable_path = format!(
            "{}/{}/sstable-{}.sst",
            inner.data_dir, SSTABLE_DIR, sstable_id
        );

        Ok(Some(PreparedFlush {
            frozen_wal_id,
            point_entries,
            range_tombstones,
            sstable_id,
            sstable_path,
        }))
    }

    /// Writes the SSTable file and reopens its footer — the disk-I/O-heavy
    /// step of a flush. Takes no lock; callers run this between two
    /// separate `self.inner.write()` acquisitions.
    fn build_flush_sstable(prepared: PreparedFlush) -> Result<(SSTable, BuiltFlush), EngineError> {
        let point_count = prepared.point_entries.len();
        let range_count = prepared.range_tombstones.len();
        let min_expires_at = prepared
            .point_entries
            .iter()
            .map(|e| e.expires_at)
            .filter(|&t| t != NO_EXPIRY)
            .min()
            .unwrap_or(crate::manifest::NO_EXPIRY);

        sstable::SstWriter::new(&prepared.sstable_path).build(
            prepared.point_entries.into_iter(),
            point_count,
            prepared.range_tombstones.into_iter(),
            range_count,
        )?;

        let mut sstable = SSTable::open(&prepared.sstable_path)?;
        sstable.id = prepared.sstable_id;

        Ok((
            sstable,
            BuiltFlush {
                frozen_wal_id: prepared.frozen_wal_id,
                sstable_id: prepared.sstable_id,
                sstable_path: prepared.sstable_path,
                min_expires_at,
            },
        ))
    }

    /// Inserts the newly built SSTable and records it in the manifest.
    /// The only step of a flush that needs `self.inner.write()`.
    fn splice_flushed_sstable(
        inner: &mut EngineInner,
        sstable: SSTable,
        built: BuiltFlush,
    ) -> Result<(), EngineError> {
        inner.sstables.insert(0, sstable);

        inner.manifest.add_sstable(ManifestSstEntry {
            id: built.sstable_id,
            path: built.sstable_path.into(),
            min_expires_at: built.min_expires_at,
        })?;

        inner.manifest.remove_frozen_wal(built.frozen_wal_id)?;

        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Compaction API
    // --------------------------------------------------------------------------------------------

    /// Execute a compaction strategy, applying the result to the engine.
    ///
    /// Returns `Ok(true)` if compaction was performed, `Ok(false)` if
    /// the strategy decided there was nothing to do.
    fn run_compaction(
        &self,
        strategy: &dyn crate::compaction::CompactionStrategy,
    ) -> Result<bool, EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        let inner = &mut *inner; // reborrow to split fields
        let sst_count = inner.sstables.len();
        let result = strategy
            .compact(
                &inner.sstables,
                &mut inner.manifest,
                &inner.data_dir,
                &inner.config,
            )
            .map_err(|e| EngineError::Internal(format!("Compaction failed: {e}")))?;

        match result {
            None => {
                tracing::debug!(sst_count, "compaction strategy found nothing to do");
                Ok(false)
            }
            Some(cr) => {
                tracing::info!(
                    sst_count_before = sst_count,
                    removed = cr.removed_ids.len(),
                    new_id = ?cr.new_sst_id,
                    "compaction applied"
                );
                Self::apply_compaction_result(inner, cr)?;
                Ok(true)
            }
        }
    }

    /// Runs one round of **minor compaction** (size-tiered).
    ///
    /// Selects the best bucket whose size exceeds `min_threshold` and merges
    /// those SSTables into a single new SSTable, deduplicating point entries
    /// and preserving all tombstones.
    ///
    /// Returns `Ok(true)` if compaction was performed, `Ok(false)` if no
    /// bucket met the threshold.
    pub fn minor_compact(&self) -> Result<bool, EngineError> {
        let strategy = {
            let inner = self
                .inner
                .read()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            if inner.closed {
                return Err(EngineError::Shutdown);
            }
            inner.config.compaction_strategy.minor()
        };
        self.run_compaction(strategy.as_ref())
    }

    /// Runs one round of **tombstone compaction** (per-SSTable GC).
    ///
    /// Selects the SSTable with the highest tombstone ratio that exceeds
    /// `tombstone_ratio_threshold` and rewrites it, dropping provably-unnecessary
    /// tombstones.
    ///
    /// Returns `Ok(true)` if compaction was performed, `Ok(false)` if no
    /// SSTable was eligible.
    pub fn tombstone_compact(&self) -> Result<bool, EngineError> {
        let strategy = {
            let inner = self
                .inner
                .read()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            if inner.closed {
                return Err(EngineError::Shutdown);
            }
            inner.config.compaction_strategy.tombstone()
        };
        self.run_compaction(strategy.as_ref())
    }

    /// Runs **major compaction** — merges all SSTables into one.
    ///
    /// Actively applies range tombstones to suppress covered Puts, and
    /// drops all spent tombstones from the output.
    ///
    /// Returns `Ok(true)` if compaction was performed, `Ok(false)` if
    /// there are fewer than 2 SSTables.
    pub fn major_compact(&self) -> Result<bool, EngineError> {
        let strategy = {
            let inner = self
                .inner
                .read()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            if inner.closed {
                return Err(EngineError::Shutdown);
            }
            inner.config.compaction_strategy.major()
        };
        self.run_compaction(strategy.as_ref())
    }

    /// Applies a `CompactionResult` to the in-memory engine state.
    ///
    /// Removes consumed SSTables, inserts the newly built one, and
    /// re-sorts by `max_lsn` descending so that `get()` can
    /// early-terminate correctly.
    fn apply_compaction_result(
        inner: &mut EngineInner,
        cr: crate::compaction::CompactionResult,
    ) -> Result<(), EngineError> {
        // Remove consumed SSTables.
        inner
            .sstables
            .retain(|sst| !cr.removed_ids.contains(&sst.id));

        // Load and insert new SSTable if one was produced.
        if let Some(ref path) = cr.new_sst_path {
            let mut new_sst = SSTable::open(path)?;
            new_sst.id = cr.new_sst_id.unwrap_or(0);
            inner.sstables.push(new_sst);
        }

        // Re-sort by max_lsn descending to maintain the early-termination
        // invariant used by get().
        inner
            .sstables
            .sort_by(|a, b| b.properties.max_lsn.cmp(&a.properties.max_lsn));

        Ok(())
    }
}

/// Type alias preserving the public scan iterator name.
pub type EngineScanIterator = utils::MergeIterator<'static>;

/// Filters a sorted record stream to yield only **visible** key-value pairs.
///
/// Applies point tombstone and range tombstone semantics:
/// - A `Delete` record suppresses the same key in later (lower-LSN) records.
/// - A `RangeDelete` suppresses any `Put` whose key falls within `[start, end)`
///   and whose LSN is lower than the tombstone's LSN.
///
/// The input iterator **must** be sorted by `(key ASC, LSN DESC)` — the order
/// produced by [`MergeIterator`](utils::MergeIterator).
pub struct VisibilityFilter<I>
where
    I: Iterator<Item = Record>,
{
    /// Underlying merged record stream.
    input: I,
    /// The key most recently emitted or suppressed (used for dedup).
    current_key: Option<Vec<u8>>,
    /// Accumulated range tombstones that may cover upcoming keys.
    active_ranges: Vec<RangeTombstone>,
    /// Decrypts stored ciphertexts before they're yielded.
    crypto: Arc<Crypto>,
}

impl<I> VisibilityFilter<I>
where
    I: Iterator<Item = Record>,
{
    pub fn new(input: I, crypto: Arc<Crypto>) -> Self {
        Self {
            input,
            current_key: None,
            active_ranges: Vec::new(),
            crypto,
        }
    }
}

impl<I> Iterator for VisibilityFilter<I>
where
    I: Iterator<Item = Record>,
{
    type Item = (Vec<u8>, Vec<u8>); // (key, plaintext value)

    fn next(&mut self) -> Option<Self::Item> {
        let now = now_millis();

        for record in self.input.by_ref() {
            match record {
                Record::RangeDelete {
                    start,
                    end,
                    lsn,
                    timestamp,
                } => {
                    self.active_ranges.push(RangeTombstone {
                        start,
                        end,
                        lsn,
                        timestamp,
                    });
                    // Range tombstone itself is not returned
                }

                Record::Delete { key, .. } => {
                    self.current_key = Some(key.clone());
                }

                Record::BatchCommit { .. } => {
                    // Batch markers are a WAL-only framing concept; they
                    // never carry key/value data and are filtered out
                    // upstream of the merge, but handle them defensively.
                }

                Record::Put {
                    key,
                    value,
                    lsn,
                    timestamp,
                    nonce,
                    expires_at,
                    key_version,
                    checksum,
                } => {
                    // Skip if we've already handled this key
                    if self.current_key.as_deref() == Some(&key) {
                        continue;
                    }

                    // Check range tombstones
                    let deleted = self.active_ranges.iter().any(|r| {
                        r.start.as_slice() <= key.as_slice()
                            && key.as_slice() < r.end.as_slice()
                            && r.lsn > lsn
                    });

                    self.current_key = Some(key.clone());

                    if deleted {
                        continue; // This record is shadowed by a range tombstone
                    }

                    if expires_at != NO_EXPIRY && now >= expires_at {
                        continue; // Expired — treat as absent.
                    }

                    if entry_checksum(&key, &value, timestamp, false, &nonce) != checksum {
                        // Per-entry checksum doesn't match — the entry's own
                        // fields were corrupted on disk. The iterator's item
                        // type carries no error channel, so skip it the same
                        // way a decrypt failure is handled below.
                        tracing::error!(key = ?key, "dropping entry with bad checksum during scan");
                        continue;
                    }

                    match decrypt_value(&self.crypto, &key, key_version, &nonce, &value) {
                        Ok(plaintext) => return Some((key, plaintext)),
                        Err(e) => {
                            // Authentication failure on a stored entry means
                            // on-disk corruption or a lost key version —
                            // skip it rather than aborting the whole scan.
                            tracing::error!(key = ?key, error = %e, "dropping unreadable entry during scan");
                            continue;
                        }
                    }
                }
            }
        }

        None
    }
}
