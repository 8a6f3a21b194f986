//! # Concurrency Control
//!
//! Two cooperating pieces:
//!
//! - [`LockManager`]: queued shared/exclusive locks at table, page, or
//!   row granularity, with condvar blocking, timeouts, upgrade, and
//!   wait-for-graph deadlock detection.
//! - [`TransactionManager`]: transaction lifecycle (begin/commit/abort),
//!   isolation-level visibility, and the commit/abort protocol that ties
//!   the WAL, buffer pool, and lock manager together.
//!
//! Two-phase locking is the concurrency model: a transaction acquires
//! locks as it touches data and releases everything at commit or abort.
//! Deadlocks between transactions are detected (not prevented). The
//! engine's own mutexes cannot deadlock: the transaction-manager mutex
//! is the only one held across calls into other subsystems, and the
//! WAL, lock-manager, and buffer-pool mutexes are leaf locks, taken one
//! at a time and never nested with each other.

pub mod lock_manager;
pub mod transaction;

pub use lock_manager::{LockManager, LockMode, ResourceId};
pub use transaction::{
    IsolationLevel, Transaction, TransactionManager, TxnHandle, TxnState,
};
