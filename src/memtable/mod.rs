//! # Memtable Module
//!
//! ## Design Invariants
//!
//! - All writes are WAL-first and assigned a monotonically increasing LSN.
//! - The memtable may contain multiple versions per key; the highest-LSN
//!   version is considered authoritative.
//! - Deletes are represented via tombstones, not physical removal.
//! - Range tombstones logically delete all keys in `[start, end)`
//!   with lower LSNs.
//! - Reads (`get`, `scan`) always resolve point entries against
//!   range tombstones.
//! - Every write — whether a single `put`/`delete` or a multi-record
//!   [`Memtable::apply_batch`] — is framed on the WAL as zero or more
//!   [`Record`]s followed by exactly one [`Record::BatchCommit`] marker,
//!   written in a single locked section with a single fsync. Replay only
//!   ever applies records once their commit marker is observed intact;
//!   a torn trailing batch is discarded rather than partially applied.
//!
//! ## Flush Semantics
//!
//! - `iter_for_flush` returns a *logical snapshot* of the memtable state.
//! - Returned records are sufficient to reconstruct the same memtable
//!   state via WAL replay.
//! - Flush iteration does **not** mutate or clear in-memory state.
//!
//! ## Frozen Memtable
//!
//! - A `FrozenMemtable` is read-only.
//! - It retains ownership of the WAL to guarantee durability until
//!   data is persisted to SSTables.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    cmp::Reverse,
    collections::BTreeMap,
    path::Path,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use crate::engine::utils::{PointEntry, RangeTombstone, Record, entry_checksum};
use crate::wal::{Wal, WalError};
use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{error, info, trace, warn};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Represents possible errors returned by [`Memtable`] operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Underlying WAL I/O failure.
    #[error("WAL error: {0}")]
    WAL(#[from] WalError),

    /// Write buffer limit reached; a flush is required before further writes.
    #[error("Flush required")]
    FlushRequired,

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),

    /// A record's per-entry checksum did not match its recomputed value
    /// during WAL replay — the record's own fields were corrupted on disk.
    #[error("checksum mismatch replaying WAL record at lsn {lsn}")]
    ChecksumMismatch { lsn: u64 },
}

/// A single write to apply as part of a multi-record atomic batch.
///
/// Values here are already encrypted (ciphertext, nonce, key version) —
/// the memtable does not perform encryption itself; see [`crate::batch`]
/// and [`crate::engine`] for the encryption boundary.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        nonce: Vec<u8>,
        expires_at: u64,
        key_version: u32,
    },
    Delete {
        key: Vec<u8>,
    },
    RangeDelete {
        start: Vec<u8>,
        end: Vec<u8>,
    },
}

/// Result of a `get` operation on the memtable.
#[derive(Debug, PartialEq)]
pub enum MemtableGetResult {
    /// Value found for the key, still encrypted.
    Put {
        value: Vec<u8>,
        nonce: Vec<u8>,
        expires_at: u64,
        key_version: u32,
    },

    /// Key was deleted by a point tombstone.
    Delete,

    /// Key was deleted by a range tombstone.
    RangeDelete,

    /// Key not found in the memtable.
    NotFound,
}

/// Internal shared state of the memtable.
///
/// This structure is protected by an `RwLock` and must never be
/// accessed directly outside the memtable implementation.
struct MemtableInner {
    /// Point entries grouped by key, then ordered by descending LSN.
    tree: BTreeMap<Vec<u8>, BTreeMap<Reverse<u64>, PointEntry>>,

    /// Range tombstones indexed by start key and ordered by descending LSN.
    range_tombstones: BTreeMap<Vec<u8>, BTreeMap<Reverse<u64>, RangeTombstone>>,

    /// Approximate in-memory footprint.
    approximate_size: usize,

    /// Configured maximum buffer size before flush is required.
    write_buffer_size: usize,
}

/// The mutable, in-memory write buffer of the storage engine.
///
/// The memtable:
/// - Accepts writes (`put`, `delete`, `delete_range`, `apply_batch`)
/// - Persists all mutations to a WAL
/// - Serves reads (`get`, `scan`)
/// - Can be logically flushed via `iter_for_flush`
///
/// Internally, the memtable stores **multiple versions per key** ordered
/// by descending LSN. Resolution is deferred to read time.
///
/// # Concurrency
/// - Writers acquire an exclusive lock
/// - Readers may proceed concurrently
///
/// # Durability
/// - Every mutation is appended to the WAL *before* being applied in memory
pub struct Memtable {
    /// Thread-safe container for in-memory data and metadata.
    inner: Arc<RwLock<MemtableInner>>,

    /// Associated write-ahead log for durability.
    pub wal: Wal<Record>,

    /// Monotonic log sequence number (LSN) for version ordering.
    next_lsn: AtomicU64,
}

/// Computes the CRC32 of a batch's per-record checksums, concatenated
/// in order. This is what [`Record::BatchCommit::crc32`] certifies.
fn batch_crc(checksums: &[u32]) -> u32 {
    let mut hasher = Crc32::new();
    for checksum in checksums {
        hasher.update(&checksum.to_le_bytes());
    }
    hasher.finalize()
}

impl Memtable {
    /// Creates a new mutable [`Memtable`] backed by a write-ahead log (WAL).
    ///
    /// # Arguments
    /// - `wal_path` — Path to the WAL file used for durability.
    /// - `max_record_size` — Optional maximum size of a single WAL record.
    /// - `write_buffer_size` — Maximum in-memory size before a flush is required.
    ///
    /// # Behavior
    /// - Replays the WAL (if present) to reconstruct the in-memory state.
    /// - Restores the highest observed LSN and advances the internal counter.
    /// - Subsequent writes will continue with monotonically increasing LSNs.
    /// - A trailing, uncommitted batch (records written but no matching
    ///   `BatchCommit` marker, or a marker whose count/CRC doesn't match
    ///   the buffered records) is discarded: this is the crash-tail case.
    ///
    /// # Crash Safety
    /// WAL replay guarantees recovery to the last durable state after a crash.
    pub fn new<P: AsRef<Path>>(
        wal_path: P,
        max_record_size: Option<u32>,
        write_buffer_size: usize,
    ) -> Result<Self, MemtableError> {
        info!("Initializing Memtable with WAL replay");

        let wal = Wal::open(&wal_path, max_record_size)?;

        let mut inner = MemtableInner {
            tree: BTreeMap::new(),
            range_tombstones: BTreeMap::new(),
            approximate_size: 0,
            write_buffer_size,
        };

        let mut max_lsn_seen: u64 = 0;
        let mut pending: Vec<Record> = Vec::new();

        let records = wal.replay_iter()?;
        for record in records {
            let record: Record = record?;

            match record {
                Record::BatchCommit { record_count, crc32 } => {
                    let checksums: Vec<u32> =
                        pending.iter().filter_map(|r| r.checksum()).collect();
                    if checksums.len() != pending.len()
                        || pending.len() != record_count as usize
                        || batch_crc(&checksums) != crc32
                    {
                        warn!(
                            expected = record_count,
                            actual = pending.len(),
                            "memtable WAL batch commit mismatch, discarding tail"
                        );
                        pending.clear();
                        break;
                    }

                    for record in pending.drain(..) {
                        if !record.verify_checksum() {
                            error!(lsn = record.lsn(), "memtable WAL replay: per-entry checksum mismatch");
                            return Err(MemtableError::ChecksumMismatch { lsn: record.lsn() });
                        }
                        if record.lsn() > max_lsn_seen {
                            max_lsn_seen = record.lsn();
                        }
                        apply_replayed_record(&mut inner, record);
                    }
                }
                other => pending.push(other),
            }
        }

        if !pending.is_empty() {
            warn!(
                count = pending.len(),
                "memtable WAL ended with an uncommitted batch, discarding"
            );
        }

        info!(
            "Memtable initialized successfully with LSN: {}",
            max_lsn_seen
        );

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            wal,
            next_lsn: AtomicU64::new(max_lsn_seen.saturating_add(1)),
        })
    }

    /// Inserts or updates a key with an already-encrypted value.
    ///
    /// # Behavior
    /// - The mutation is first appended to the WAL (write-ahead), framed
    ///   as a batch of one record plus its commit marker.
    /// - The entry is then applied to the in-memory balanced tree.
    /// - A unique, monotonically increasing LSN is assigned.
    pub fn put(
        &self,
        key: Vec<u8>,
        value: Vec<u8>,
        nonce: Vec<u8>,
        expires_at: u64,
        key_version: u32,
    ) -> Result<(), MemtableError> {
        trace!("put() started, key: {}", HexKey(&key));

        if key.is_empty() {
            return Err(MemtableError::Internal("Key is empty".to_string()));
        }

        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let timestamp = Self::current_timestamp();
        let checksum = entry_checksum(&key, &value, timestamp, false, &nonce);

        let record_size = Self::point_footprint(&key, &value, &nonce);
        let record = Record::Put {
            key: key.clone(),
            value: value.clone(),
            lsn,
            timestamp,
            nonce: nonce.clone(),
            expires_at,
            key_version,
            checksum,
        };

        let mut guard = self.inner.write().map_err(|_| {
            error!("Read-write lock poisoned during put");
            MemtableError::Internal("Read-write lock poisoned".into())
        })?;

        if guard.approximate_size + record_size > guard.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        // 1. WAL first (crash safety): record + its own commit marker.
        self.wal.append_batch(&[
            record,
            Record::BatchCommit {
                record_count: 1,
                crc32: batch_crc(&[checksum]),
            },
        ])?;

        // 2. In-memory update
        let entry = PointEntry {
            key: key.clone(),
            value: Some(value),
            lsn,
            timestamp,
            nonce,
            expires_at,
            key_version,
            checksum,
        };

        guard
            .tree
            .entry(key.clone())
            .or_insert_with(BTreeMap::new)
            .insert(Reverse(entry.lsn), entry);

        guard.approximate_size += record_size;

        trace!(
            "Put operation completed with LSN: {}, key: {}",
            lsn,
            HexKey(&key)
        );

        Ok(())
    }

    /// Deletes a key by inserting a tombstone entry.
    ///
    /// # Behavior
    /// - Writes a delete record (plus its own commit marker) to the WAL.
    /// - Inserts a tombstone with a higher LSN than any previous value.
    /// - The key remains in the memtable but resolves to `None`.
    pub fn delete(&self, key: Vec<u8>) -> Result<(), MemtableError> {
        trace!("delete() started, key: {}", HexKey(&key));

        if key.is_empty() {
            return Err(MemtableError::Internal("Key is empty".to_string()));
        }

        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let timestamp = Self::current_timestamp();
        let checksum = entry_checksum(&key, &[], timestamp, true, &[]);

        let record_size = Self::point_footprint(&key, &[], &[]);
        let record = Record::Delete {
            key: key.clone(),
            lsn,
            timestamp,
            checksum,
        };

        let mut guard = self.inner.write().map_err(|_| {
            error!("Read-write lock poisoned during delete");
            MemtableError::Internal("Read-write lock poisoned".into())
        })?;

        if guard.approximate_size + record_size > guard.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        self.wal.append_batch(&[
            record,
            Record::BatchCommit {
                record_count: 1,
                crc32: batch_crc(&[checksum]),
            },
        ])?;

        let entry = PointEntry::new_delete(key.clone(), lsn, timestamp, checksum);

        guard
            .tree
            .entry(key.clone())
            .or_insert_with(BTreeMap::new)
            .insert(Reverse(entry.lsn), entry);

        guard.approximate_size += record_size;

        trace!(
            "Delete operation completed with LSN: {}, key: {}",
            lsn,
            HexKey(&key)
        );

        Ok(())
    }

    /// Deletes all keys in the range `[start, end)`.
    ///
    /// # Range Semantics
    /// - Inclusive `start`
    /// - Exclusive `end`
    ///
    /// # Behavior
    /// - Writes a range tombstone (plus its own commit marker) to the WAL.
    /// - The tombstone shadows point entries with lower LSNs.
    pub fn delete_range(&self, start: Vec<u8>, end: Vec<u8>) -> Result<(), MemtableError> {
        trace!(
            "delete_range() started, start key: {}, end key: {}",
            HexKey(&start),
            HexKey(&end)
        );

        if start.is_empty() || end.is_empty() {
            return Err(MemtableError::Internal(
                "Start or end key is empty".to_string(),
            ));
        }

        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let timestamp = Self::current_timestamp();

        let record_size = std::mem::size_of::<RangeTombstone>() + start.len() + end.len();
        let record = Record::RangeDelete {
            start: start.clone(),
            end: end.clone(),
            lsn,
            timestamp,
        };

        let mut guard = self
            .inner
            .write()
            .map_err(|_| MemtableError::Internal("Read-write lock poisoned".into()))?;

        if guard.approximate_size + record_size > guard.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        self.wal.append_batch(&[
            record,
            Record::BatchCommit {
                record_count: 1,
                crc32: batch_crc(&[]),
            },
        ])?;

        let value = RangeTombstone {
            start: start.to_vec(),
            end: end.to_vec(),
            lsn,
            timestamp,
        };

        guard
            .range_tombstones
            .entry(start.to_vec())
            .or_insert_with(BTreeMap::new)
            .insert(Reverse(value.lsn), value);

        guard.approximate_size += record_size;

        trace!(
            "Delete range operation completed with LSN: {}, start key: {}, end key: {}",
            lsn,
            HexKey(&start),
            HexKey(&end),
        );

        Ok(())
    }

    /// Applies a multi-record atomic batch: all-or-nothing durability and
    /// visibility. Used by [`crate::batch`] and is how single `put`/`delete`
    /// calls are modeled internally (batches of size one).
    ///
    /// Assigns contiguous LSNs to `ops` in order, writes every resulting
    /// record plus one trailing `BatchCommit` marker in a single locked
    /// WAL append (one fsync total), then applies all of them to the
    /// in-memory tree in one pass.
    pub fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<(), MemtableError> {
        if ops.is_empty() {
            return Ok(());
        }

        let timestamp = Self::current_timestamp();
        let mut guard = self
            .inner
            .write()
            .map_err(|_| MemtableError::Internal("Read-write lock poisoned".into()))?;

        let mut records = Vec::with_capacity(ops.len() + 1);
        let mut checksums = Vec::with_capacity(ops.len());
        let mut total_footprint = 0usize;

        for op in ops {
            let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
            let record = match op {
                BatchOp::Put {
                    key,
                    value,
                    nonce,
                    expires_at,
                    key_version,
                } => {
                    let checksum = entry_checksum(&key, &value, timestamp, false, &nonce);
                    total_footprint += Self::point_footprint(&key, &value, &nonce);
                    checksums.push(checksum);
                    Record::Put {
                        key,
                        value,
                        lsn,
                        timestamp,
                        nonce,
                        expires_at,
                        key_version,
                        checksum,
                    }
                }
                BatchOp::Delete { key } => {
                    let checksum = entry_checksum(&key, &[], timestamp, true, &[]);
                    total_footprint += Self::point_footprint(&key, &[], &[]);
                    checksums.push(checksum);
                    Record::Delete {
                        key,
                        lsn,
                        timestamp,
                        checksum,
                    }
                }
                BatchOp::RangeDelete { start, end } => {
                    total_footprint += std::mem::size_of::<RangeTombstone>() + start.len() + end.len();
                    Record::RangeDelete {
                        start,
                        end,
                        lsn,
                        timestamp,
                    }
                }
            };
            records.push(record);
        }

        if guard.approximate_size + total_footprint > guard.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        let record_count = records.len() as u32;
        records.push(Record::BatchCommit {
            record_count,
            crc32: batch_crc(&checksums),
        });

        self.wal.append_batch(&records)?;

        records.pop(); // drop the commit marker, not an entry to apply
        for record in records {
            apply_replayed_record(&mut guard, record);
        }
        guard.approximate_size += total_footprint;

        Ok(())
    }

    /// Retrieves the latest visible value for a key.
    ///
    /// Resolution rules:
    /// 1. Select highest-LSN point entry
    /// 2. Check all covering range tombstones
    /// 3. If a tombstone has a higher LSN, the key is considered deleted
    ///
    /// # Returns
    /// - `Ok(Some(value))` if visible
    /// - `Ok(None)` if deleted or not present
    pub fn get(&self, key: &[u8]) -> Result<MemtableGetResult, MemtableError> {
        trace!("get() started, key: {}", HexKey(key));

        let guard = self.inner.read().map_err(|_| {
            error!("Read-write lock poisoned during scan");
            MemtableError::Internal("RwLock poisoned".into())
        })?;

        let point_opt = guard
            .tree
            .get(key)
            .and_then(|versions| versions.values().next());

        let mut covering_tombstone_lsn: Option<u64> = None;
        for (_start, versions) in guard.range_tombstones.range(..=key.to_vec()) {
            if let Some(tombstone) = versions.values().next() {
                if tombstone.start.as_slice() <= key && key < tombstone.end.as_slice() {
                    covering_tombstone_lsn = Some(
                        covering_tombstone_lsn
                            .map(|lsn| lsn.max(tombstone.lsn))
                            .unwrap_or(tombstone.lsn),
                    );
                }
            }
        }

        match (point_opt, covering_tombstone_lsn) {
            (None, None) => Ok(MemtableGetResult::NotFound),
            (None, Some(_)) => Ok(MemtableGetResult::RangeDelete),
            (Some(point), None) => Ok(point_to_get_result(point)),
            (Some(point), Some(tombstone_lsn)) => {
                if tombstone_lsn > point.lsn {
                    Ok(MemtableGetResult::RangeDelete)
                } else {
                    Ok(point_to_get_result(point))
                }
            }
        }
    }

    /// Performs an ordered range scan over `[start, end)`.
    ///
    /// Each key is resolved against:
    /// - its latest point entry
    /// - all applicable range tombstones
    ///
    /// Deleted keys are omitted from the result.
    ///
    /// # Complexity
    /// O(N * R) where R is the number of overlapping range tombstones.
    pub fn scan(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<impl Iterator<Item = (Vec<u8>, PointEntry)>, MemtableError> {
        trace!(
            "scan() started with range. Start key: {} end key: {}",
            HexKey(start),
            HexKey(end)
        );

        if start >= end {
            return Ok(Vec::new().into_iter());
        }

        let guard = self.inner.read().map_err(|_| {
            error!("Read-write lock poisoned during scan");
            MemtableError::Internal("RwLock poisoned".into())
        })?;

        let mut records = Vec::new();

        for (key, versions) in guard.tree.range(start.to_vec()..end.to_vec()) {
            let Some(point) = versions.values().next() else {
                continue;
            };

            if point.value.is_none() {
                continue;
            }

            let mut tombstone_lsn = 0;
            for (_start, t_versions) in guard.range_tombstones.range(..=key.clone()) {
                if let Some(t) = t_versions.values().next() {
                    if t.start.as_slice() <= key.as_slice() && key.as_slice() < t.end.as_slice() {
                        tombstone_lsn = tombstone_lsn.max(t.lsn);
                    }
                }
            }

            if tombstone_lsn > point.lsn {
                continue;
            }

            records.push((key.clone(), point.clone()));
        }

        Ok(records.into_iter())
    }

    /// Returns a logical snapshot of the memtable suitable for flushing.
    ///
    /// The iterator emits:
    /// - The latest version of every point key (put or delete)
    /// - **All** range tombstones
    ///
    /// # Guarantees
    /// - No filtering based on tombstone interaction
    /// - Returned records are sufficient to rebuild the same state
    /// - Does not mutate in-memory state
    ///
    /// # Intended Use
    /// This iterator is consumed by the SSTable writer.
    pub fn iter_for_flush(&self) -> Result<impl Iterator<Item = Record>, MemtableError> {
        let guard = self.inner.read().map_err(|_| {
            error!("Read-write lock poisoned during iter_for_flush");
            MemtableError::Internal("Read-write lock poisoned".into())
        })?;

        let mut records = Vec::new();

        for (key, versions) in guard.tree.iter() {
            if let Some(entry) = versions.values().next() {
                let record = match &entry.value {
                    None => Record::Delete {
                        key: key.clone(),
                        lsn: entry.lsn,
                        timestamp: entry.timestamp,
                        checksum: entry.checksum,
                    },
                    Some(value) => Record::Put {
                        key: key.clone(),
                        value: value.clone(),
                        lsn: entry.lsn,
                        timestamp: entry.timestamp,
                        nonce: entry.nonce.clone(),
                        expires_at: entry.expires_at,
                        key_version: entry.key_version,
                        checksum: entry.checksum,
                    },
                };
                records.push(record);
            }
        }

        for (start, versions) in guard.range_tombstones.iter() {
            for entry in versions.values() {
                records.push(Record::RangeDelete {
                    start: start.clone(),
                    end: entry.end.clone(),
                    lsn: entry.lsn,
                    timestamp: entry.timestamp,
                });
            }
        }

        Ok(records.into_iter())
    }

    /// Converts this mutable memtable into an immutable [`FrozenMemtable`].
    ///
    /// # Behavior
    /// - Consumes `self`, preventing any further writes.
    /// - Preserves ownership of the WAL to keep it alive during flushing.
    /// - Exposes only read-only operations.
    pub fn frozen(self) -> Result<FrozenMemtable, MemtableError> {
        Ok(FrozenMemtable::new(self))
    }

    /// Override the current LSN counter with a recovered value.
    ///
    /// # Safety / Rules
    /// - Must only be called during recovery **before any writes**.
    /// - Ensures that future LSNs always increase beyond recovered state.
    pub fn inject_max_lsn(&self, lsn: u64) {
        self.next_lsn.store(lsn.saturating_add(1), Ordering::SeqCst);
    }

    /// Returns the highest assigned LSN so far.
    ///
    /// This returns `next_lsn - 1`, since `next_lsn` always stores the next unused sequence number.
    pub fn max_lsn(&self) -> u64 {
        self.next_lsn.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Enables or disables fsync-per-write on the underlying WAL.
    pub fn set_sync_on_write(&mut self, sync_on_write: bool) {
        self.wal.set_sync_on_write(sync_on_write);
    }

    /// Returns the current system timestamp in nanoseconds.
    ///
    /// Used to tag entries for ordering and diagnostics.
    fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_nanos() as u64
    }

    fn point_footprint(key: &[u8], value: &[u8], nonce: &[u8]) -> usize {
        std::mem::size_of::<PointEntry>() + key.len() + value.len() + nonce.len()
    }
}

fn point_to_get_result(point: &PointEntry) -> MemtableGetResult {
    match &point.value {
        None => MemtableGetResult::Delete,
        Some(value) => MemtableGetResult::Put {
            value: value.clone(),
            nonce: point.nonce.clone(),
            expires_at: point.expires_at,
            key_version: point.key_version,
        },
    }
}

/// Applies one already-committed record to in-memory state during replay
/// or batch application. Never called with a `BatchCommit` marker.
fn apply_replayed_record(inner: &mut MemtableInner, record: Record) {
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
            let entry = PointEntry {
                key: key.clone(),
                value: Some(value),
                lsn,
                timestamp,
                nonce,
                expires_at,
                key_version,
                checksum,
            };
            inner
                .tree
                .entry(key)
                .or_insert_with(BTreeMap::new)
                .insert(Reverse(lsn), entry);
        }
        Record::Delete {
            key,
            lsn,
            timestamp,
            checksum,
        } => {
            let entry = PointEntry::new_delete(key.clone(), lsn, timestamp, checksum);
            inner
                .tree
                .entry(key)
                .or_insert_with(BTreeMap::new)
                .insert(Reverse(lsn), entry);
        }
        Record::RangeDelete {
            start,
            end,
            lsn,
            timestamp,
        } => {
            let tombstone = RangeTombstone {
                start: start.clone(),
                end,
                lsn,
                timestamp,
            };
            inner
                .range_tombstones
                .entry(start)
                .or_insert_with(BTreeMap::new)
                .insert(Reverse(lsn), tombstone);
        }
        Record::BatchCommit { .. } => {
            unreachable!("BatchCommit markers are consumed by the replay/apply loop")
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Frozen Memtable
// ------------------------------------------------------------------------------------------------

/// An immutable, read-only view of a memtable.
///
/// A frozen memtable:
/// - Exposes only read APIs
/// - Retains ownership of the WAL
/// - Prevents further mutation by construction
///
/// This type represents a memtable that is in the process of being flushed
/// to an on-disk SSTable.
pub struct FrozenMemtable {
    pub memtable: Memtable,
    pub creation_timestamp: u64,
}

impl FrozenMemtable {
    /// Creates a new frozen memtable by opening and replaying a WAL.
    pub fn new(memtable: Memtable) -> Self {
        Self {
            memtable,
            creation_timestamp: Memtable::current_timestamp(),
        }
    }

    /// Retrieves the latest visible value for a key.
    pub fn get(&self, key: &[u8]) -> Result<MemtableGetResult, MemtableError> {
        self.memtable.get(key)
    }

    /// Performs a range scan over the frozen memtable.
    pub fn scan(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<impl Iterator<Item = (Vec<u8>, PointEntry)>, MemtableError> {
        self.memtable.scan(start, end)
    }

    /// Returns all records required to materialize this memtable into an SSTable.
    pub fn iter_for_flush(&self) -> Result<impl Iterator<Item = Record>, MemtableError> {
        self.memtable.iter_for_flush()
    }

    /// Returns the highest assigned LSN so far.
    pub fn max_lsn(&self) -> u64 {
        self.memtable.max_lsn()
    }
}

// ------------------------------------------------------------------------------------------------
// Tracing Helper
// ------------------------------------------------------------------------------------------------

struct HexKey<'a>(&'a [u8]);

impl<'a> std::fmt::Display for HexKey<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.len() <= 32 {
            for byte in self.0 {
                write!(f, "{:02x}", byte)?;
            }
        } else {
            for byte in &self.0[..16] {
                write!(f, "{:02x}", byte)?;
            }
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}
