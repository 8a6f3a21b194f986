//! # Configuration Constants
//!
//! This module centralizes the constants that define the on-disk format
//! and the runtime defaults. Constants that depend on each other are
//! co-located and the relationships are enforced by compile-time
//! assertions where possible.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> PAGE_HEADER_SIZE (20 bytes, fixed)
//!       │
//!       ├─> SLOT_ENTRY_SIZE (5 bytes per directory entry)
//!       │
//!       └─> page offset formula:
//!             FILE_HEADER_SIZE + FREE_LIST_AREA_SIZE + page_id * PAGE_SIZE
//!
//! MAX_FREE_LIST_ENTRIES (1024)
//!       │
//!       └─> FREE_LIST_AREA_SIZE (derived: entries * 4 bytes)
//!             The area is FIXED: freeing and reallocating pages never
//!             perturbs any other page's offset.
//!
//! WAL_BUFFER_SIZE (64 KiB)
//!       │
//!       └─> a record larger than the remaining buffer space forces a
//!           flush before it is appended; records never span buffers.
//! ```
//!
//! ## Changing Constants
//!
//! `PAGE_SIZE`, `FILE_HEADER_SIZE`, `FREE_LIST_AREA_SIZE`, and the header
//! layouts are part of the database file format; changing them breaks
//! every existing file. The runtime defaults (`DEFAULT_POOL_SIZE`,
//! `DEFAULT_BTREE_ORDER`, `DEFAULT_LOCK_TIMEOUT`) are safe to tune.

use std::time::Duration;

/// Size of every page on disk and in memory.
pub const PAGE_SIZE: usize = 4096;

/// Fixed page header: page_id, next_page, num_slots, free cursors,
/// reserved, checksum. See `storage::page` for the byte layout.
pub const PAGE_HEADER_SIZE: usize = 20;

/// On-disk bytes per slot directory entry (offset, length, deleted flag).
pub const SLOT_ENTRY_SIZE: usize = 5;

/// Database file header: magic, version, page count, free-list length,
/// reserved padding up to 64 bytes.
pub const FILE_HEADER_SIZE: usize = 64;

/// `0x4D494E49`, ASCII "MINI" read little-endian from the file start.
pub const FILE_MAGIC: u32 = 0x4D49_4E49;

/// On-disk format version understood by this build.
pub const FILE_VERSION: u32 = 1;

/// Capacity of the fixed free-list area between the header and page 0.
pub const MAX_FREE_LIST_ENTRIES: usize = 1024;

/// Bytes reserved for the free list. Fixed so page offsets never move.
pub const FREE_LIST_AREA_SIZE: usize = MAX_FREE_LIST_ENTRIES * 4;

/// In-memory WAL write buffer. Flushed when full, on commit, and on
/// checkpoint.
pub const WAL_BUFFER_SIZE: usize = 64 * 1024;

/// Default number of buffer pool frames.
pub const DEFAULT_POOL_SIZE: usize = 64;

/// Default B+ tree order (maximum children per internal node).
pub const DEFAULT_BTREE_ORDER: usize = 4;

/// Smallest order at which the rebalancing rules are well-defined.
pub const MIN_BTREE_ORDER: usize = 3;

/// Default deadline for `LockManager::acquire` and the granularity sugar.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const _: () = assert!(FREE_LIST_AREA_SIZE == MAX_FREE_LIST_ENTRIES * size_of::<u32>());
const _: () = assert!(PAGE_HEADER_SIZE < PAGE_SIZE);
const _: () = assert!(DEFAULT_BTREE_ORDER >= MIN_BTREE_ORDER);

/// Runtime knobs consumed by [`crate::DatabaseBuilder`].
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub pool_size: usize,
    pub btree_order: usize,
    pub lock_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            btree_order: DEFAULT_BTREE_ORDER,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}
