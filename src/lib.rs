//! # veilkv
//!
//! An embeddable, encrypted, persistent key-value storage engine built on
//! a **Log-Structured Merge Tree (LSM-tree)** architecture. Designed for
//! fast writes, crash-safe operation, and at-rest confidentiality.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Engine                           │
//! │  ┌────────────┐  ┌──────────────┐  ┌─────────────┐  │
//! │  │  Active     │  │   Frozen     │  │  SSTables   │  │
//! │  │  Memtable   │  │  Memtables   │  │  (on disk)  │  │
//! │  │  + WAL      │  │  + WALs      │  │             │  │
//! │  └─────┬───────┘  └──────┬───────┘  └──────┬──────┘  │
//! │        │   freeze        │   flush         │         │
//! │        └─────────►       └────────►        │         │
//! │                                            │         │
//! │  ┌──────────────────────────────────────────┘         │
//! │  │  Compaction (minor / tombstone / major)           │
//! │  └───────────────────────────────────────────────────┘│
//! │                                                      │
//! │  ┌──────────────────────────────────────────────────┐ │
//! │  │              Manifest (WAL + snapshot)           │ │
//! │  └──────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core storage engine — open, read, write, scan, flush, compact |
//! | [`memtable`] | In-memory write buffer with multi-version entries and range tombstones |
//! | [`wal`] | Generic, CRC-protected write-ahead log for crash recovery |
//! | [`sstable`] | Immutable, sorted, on-disk tables with bloom filters and block indices |
//! | [`manifest`] | Persistent metadata manager (WAL + snapshot model) |
//! | [`compaction`] | Size-tiered, tombstone, and major compaction strategies |
//! | [`crypto`] | Envelope encryption (AEAD + HKDF key derivation) |
//! | [`batch`] | Buffered multi-key atomic write batches |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is persisted to a WAL before
//!   being acknowledged, guaranteeing durability and crash recovery.
//! - **Envelope encryption** — every value is encrypted with
//!   XChaCha20-Poly1305 under a key derived from a master key via HKDF;
//!   key rotation is supported without re-encrypting existing entries.
//! - **Multi-version concurrency** — multiple versions per key, ordered by
//!   log sequence number (LSN). Reads always see the latest committed version.
//! - **Point and range tombstones, and per-key TTL** — efficient delete
//!   semantics for individual keys, key ranges, and time-based expiry.
//! - **Bloom filter lookups** — each SSTable carries a bloom filter for
//!   fast negative point-lookup responses.
//! - **Block-level and per-entry CRC32 integrity** — every on-disk block
//!   and every individual entry is checksummed independently.
//! - **Pluggable compaction** — three strategies (minor, tombstone, major)
//!   with configurable thresholds.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use veilkv::engine::{Engine, EngineConfig};
//!
//! let config = EngineConfig::default();
//! let engine = Engine::open("/tmp/my_db", config).unwrap();
//!
//! // Write (encrypted at rest)
//! engine.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
//!
//! // Read (transparently decrypted)
//! assert_eq!(engine.get(b"hello".to_vec()).unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! engine.delete(b"hello".to_vec()).unwrap();
//! assert_eq!(engine.get(b"hello".to_vec()).unwrap(), None);
//!
//! // Scan
//! engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
//! engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();
//! let results: Vec<_> = engine.scan(b"a", b"c").unwrap().collect();
//!
//! // Graceful shutdown
//! engine.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod batch;
pub mod compaction;
pub mod crypto;
pub mod encoding;
pub mod engine;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod wal;
