//! Buffered, atomically-committed multi-key writes.
//!
//! A [`BatchWriter`] accumulates puts, deletes, and range deletes in
//! memory. Nothing touches the WAL until [`BatchWriter::commit`] is
//! called, at which point every buffered operation is encrypted,
//! assigned a contiguous LSN run, and written to the active memtable's
//! WAL as one append followed by a single `BatchCommit` marker — so a
//! crash mid-batch either replays the whole thing or none of it.
//!
//! Values are plaintext while buffered in the writer and are only
//! encrypted at commit time, under whatever key version is current at
//! that moment.

use std::time::Duration;

use crate::engine::{Engine, EngineError};

/// One buffered operation awaiting commit.
#[derive(Debug, Clone)]
pub enum PendingOp {
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    Delete {
        key: Vec<u8>,
    },
    DeleteRange {
        start: Vec<u8>,
        end: Vec<u8>,
    },
}

/// Accumulates writes for atomic, all-or-nothing application.
///
/// Obtained via [`Engine::batch`]. Buffering is purely in-memory — drop
/// the writer without calling [`commit`](BatchWriter::commit) to discard
/// everything buffered so far.
pub struct BatchWriter {
    engine: Engine,
    ops: Vec<PendingOp>,
}

impl BatchWriter {
    pub(crate) fn new(engine: Engine) -> Self {
        Self {
            engine,
            ops: Vec::new(),
        }
    }

    /// Buffers a put with no expiry.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(PendingOp::Put {
            key,
            value,
            ttl: None,
        });
        self
    }

    /// Buffers a put that expires `ttl` after the batch commits.
    pub fn put_with_ttl(&mut self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> &mut Self {
        self.ops.push(PendingOp::Put {
            key,
            value,
            ttl: Some(ttl),
        });
        self
    }

    /// Buffers a point delete.
    pub fn delete(&mut self, key: Vec<u8>) -> &mut Self {
        self.ops.push(PendingOp::Delete { key });
        self
    }

    /// Buffers a range delete over `[start, end)`.
    pub fn delete_range(&mut self, start: Vec<u8>, end: Vec<u8>) -> &mut Self {
        self.ops.push(PendingOp::DeleteRange { start, end });
        self
    }

    /// Number of operations buffered so far.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// `true` if no operations have been buffered.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Applies every buffered operation as a single durable unit.
    ///
    /// On success, all operations are visible to subsequent reads. On
    /// failure (e.g. an oversized value), none of the batch's operations
    /// take effect — the active memtable and WAL are left unchanged.
    pub fn commit(self) -> Result<(), EngineError> {
        self.engine.commit_batch(self.ops)
    }
}
