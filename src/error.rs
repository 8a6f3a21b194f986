//! # Error Types
//!
//! One crate-wide error enum covers every failure the storage core can
//! raise. Callers match on variants: the executor maps most of them to
//! failed statements, while `LockTimeout` and `DeadlockDetected` are
//! expected to abort the owning transaction.
//!
//! Storage faults (`ShortRead`, `ChecksumMismatch`) are fatal to the
//! calling operation but never terminate the process, and no error path
//! corrupts on-disk state: if a write fails partway, the WAL remains the
//! source of truth.

use crate::storage::{PageId, SlotId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not a database file (bad magic)")]
    BadFormat,

    #[error("unsupported database version {0}")]
    UnsupportedVersion(u32),

    #[error("short read on page {0}: got {1} of {2} bytes")]
    ShortRead(PageId, usize, usize),

    #[error("short write on page {0}")]
    ShortWrite(PageId),

    #[error("checksum mismatch on page {page_id}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        page_id: PageId,
        stored: u32,
        computed: u32,
    },

    #[error("page {0} is not resident in the buffer pool")]
    NotResident(PageId),

    #[error("buffer pool exhausted: all {0} frames are pinned")]
    BufferPoolExhausted(usize),

    #[error("page {0} is pinned and cannot be deleted")]
    PagePinned(PageId),

    #[error("record of {needed} bytes does not fit in page {page_id} ({free} free)")]
    PageFull {
        page_id: PageId,
        needed: usize,
        free: usize,
    },

    #[error("slot {1} absent or deleted on page {0}")]
    SlotAbsent(PageId, SlotId),

    #[error("corrupt page {0}: {1}")]
    CorruptPage(PageId, String),

    #[error("key {0} not found")]
    KeyNotFound(i64),

    #[error("duplicate key {0} in unique index")]
    DuplicateKey(i64),

    #[error("lock wait timed out on {0}")]
    LockTimeout(String),

    #[error("lock upgrade blocked on {0}: other shared holders present")]
    LockUpgradeBlocked(String),

    #[error("no lock held on {0}")]
    LockNotHeld(String),

    #[error("transaction {0} is not active")]
    TxnNotActive(u64),

    #[error("deadlock detected")]
    DeadlockDetected,

    #[error("serialization conflict: read set invalidated by a concurrent commit")]
    SerializationConflict,

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("corrupt wal record at offset {0}: {1}")]
    CorruptWalRecord(u64, String),

    #[error("invalid row encoding: {0}")]
    InvalidRow(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
