//! # MiniDB - Embedded SQL Storage Core
//!
//! MiniDB is the storage, indexing, concurrency, and recovery core of an
//! embedded single-process SQL database. It persists tabular data in a
//! single paged file and serves one client thread or a small number of
//! cooperating threads. The SQL surface (tokenizer, parser, planner,
//! executor) is an external collaborator; this crate fixes the interfaces
//! it consumes.
//!
//! ## Quick Start
//!
//! ```ignore
//! use minidb::Database;
//!
//! let db = Database::builder()
//!     .path("./mydb")
//!     .pool_size(64)
//!     .open()?;
//!
//! let txn = db.begin(IsolationLevel::ReadCommitted)?;
//! // ... fetch pages, insert records, maintain indexes ...
//! db.commit(&txn)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Public API (Database)        │
//! ├──────────────────┬──────────────────┤
//! │ Catalog / Schema │   Transactions   │
//! ├──────────────────┼──────────────────┤
//! │   B+ Tree Index  │   Lock Manager   │
//! ├──────────────────┴──────────────────┤
//! │   Buffer Pool (LRU, pin counts)     │
//! ├─────────────────────────────────────┤
//! │   Slotted Pages + File Manager      │
//! ├─────────────────────────────────────┤
//! │        Write-Ahead Log (WAL)        │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! A database at base path `mydb` consists of three files:
//!
//! ```text
//! mydb.db    # paged data file: 64-byte header, free-list area, 4 KiB pages
//! mydb.wal   # append-only write-ahead log
//! mydb.cat   # binary catalog (table and index descriptors)
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: file manager, slotted pages, buffer pool, WAL
//! - [`btree`]: arena-based B+ tree mapping int64 keys to record ids
//! - [`concurrency`]: S/X lock manager and transaction manager
//! - [`schema`]: catalog of table and index descriptors
//! - [`records`]: tagged row encoding shared with the query layer
//! - [`database`]: the facade value owning every subsystem
//!
//! ## Durability Contract
//!
//! Every mutation is logged before the in-memory page is touched; COMMIT
//! records are forced to disk before `commit` returns. Recovery replays
//! committed changes (redo) and rolls back unresolved ones (undo) from the
//! log on open.

pub mod btree;
pub mod concurrency;
pub mod config;
pub mod database;
pub mod error;
pub mod records;
pub mod schema;
pub mod storage;

pub use concurrency::{IsolationLevel, LockMode, ResourceId, TxnState};
pub use database::{Database, DatabaseBuilder};
pub use error::{Error, Result};
pub use records::{Row, Value};
pub use storage::wal::RecoveryInfo;
pub use storage::{PageId, RecordId, SlotId, TableId};
