//! # Transaction Management
//!
//! The [`TransactionManager`] coordinates the WAL, buffer pool, and lock
//! manager through the transaction lifecycle:
//!
//! ```text
//! begin ──> ACTIVE ──commit──> COMMITTED
//!              │
//!              └───abort────>  ABORTED
//! ```
//!
//! ## Commit Protocol
//!
//! 1. WAL commit record, force-flushed (the durability point)
//! 2. flush every page the transaction modified
//! 3. release all locks
//! 4. state COMMITTED, remember the commit LSN
//!
//! ## Abort Protocol
//!
//! Modified pages are discarded from the buffer pool without write-back,
//! so the next fetch re-reads the last durable image. (A page that was
//! already evicted and written back is repaired by WAL undo at the next
//! recovery; crash recovery trusts only the log.) Then WAL abort, lock
//! release, state ABORTED.
//!
//! ## Visibility
//!
//! [`is_visible`](TransactionManager::is_visible) implements the
//! isolation ladder: READ_UNCOMMITTED sees everything, READ_COMMITTED
//! sees committed writers, REPEATABLE_READ and SERIALIZABLE additionally
//! require the writer to have committed before the reader's snapshot
//! LSN (captured at begin). SERIALIZABLE commits are validated against
//! the write sets of transactions that committed after the snapshot; an
//! overlap with the read set forces an abort.
//!
//! ## Locking
//!
//! The manager mutex is the only lock held across subsystem calls:
//! commit and abort take it, then the transaction's own handle, and
//! from there call into the WAL, buffer pool, and lock manager one at a
//! time (no two of those three are ever held together).
//! [`is_visible`](TransactionManager::is_visible) copies the reader's
//! fields out of its handle and releases it before consulting the
//! manager map, so a handle lock never waits on the manager mutex.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::storage::wal::RecoveryInfo;
use crate::storage::{
    BufferPool, Lsn, PageId, SlotId, TableId, TxnId, WalManager, INVALID_LSN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxnState {
    #[default]
    Active,
    Committed,
    Aborted,
}

/// Item granularity used by the read and write sets.
pub type ItemKey = (TableId, PageId, SlotId);

#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    isolation: IsolationLevel,
    state: TxnState,
    snapshot_lsn: Lsn,
    commit_lsn: Lsn,
    modified_pages: HashSet<PageId>,
    read_set: HashSet<ItemKey>,
    write_set: HashSet<ItemKey>,
}

impl Transaction {
    fn new(id: TxnId, isolation: IsolationLevel, snapshot_lsn: Lsn) -> Self {
        Self {
            id,
            isolation,
            state: TxnState::Active,
            snapshot_lsn,
            commit_lsn: INVALID_LSN,
            modified_pages: HashSet::new(),
            read_set: HashSet::new(),
            write_set: HashSet::new(),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn snapshot_lsn(&self) -> Lsn {
        self.snapshot_lsn
    }

    /// LSN of the COMMIT record; `INVALID_LSN` until committed.
    pub fn commit_lsn(&self) -> Lsn {
        self.commit_lsn
    }

    /// Track a page for flush-on-commit / discard-on-abort.
    pub fn add_modified_page(&mut self, page_id: PageId) {
        self.modified_pages.insert(page_id);
    }

    pub fn modified_pages(&self) -> &HashSet<PageId> {
        &self.modified_pages
    }

    pub fn add_read_item(&mut self, table: TableId, page: PageId, slot: SlotId) {
        self.read_set.insert((table, page, slot));
    }

    pub fn has_read_item(&self, table: TableId, page: PageId, slot: SlotId) -> bool {
        self.read_set.contains(&(table, page, slot))
    }

    pub fn add_write_item(&mut self, table: TableId, page: PageId, slot: SlotId) {
        self.write_set.insert((table, page, slot));
    }

    pub fn read_set(&self) -> &HashSet<ItemKey> {
        &self.read_set
    }

    pub fn write_set(&self) -> &HashSet<ItemKey> {
        &self.write_set
    }
}

/// Shared handle to a transaction. The executor that began the
/// transaction owns the handle and is the only mutator of its sets; the
/// manager finalizes it exactly once through commit or abort.
pub type TxnHandle = Arc<Mutex<Transaction>>;

struct ManagerInner {
    transactions: HashMap<TxnId, TxnHandle>,
    /// Id kept alongside the handle so clearing the current transaction
    /// never has to lock a handle the caller already holds.
    current: Option<(TxnId, TxnHandle)>,
}

pub struct TransactionManager {
    wal: Arc<WalManager>,
    lock_manager: Arc<crate::concurrency::LockManager>,
    buffer_pool: Arc<BufferPool>,
    inner: Mutex<ManagerInner>,
}

impl TransactionManager {
    pub fn new(
        wal: Arc<WalManager>,
        lock_manager: Arc<crate::concurrency::LockManager>,
        buffer_pool: Arc<BufferPool>,
    ) -> Self {
        Self {
            wal,
            lock_manager,
            buffer_pool,
            inner: Mutex::new(ManagerInner {
                transactions: HashMap::new(),
                current: None,
            }),
        }
    }

    /// Start a transaction: the WAL issues the id and logs BEGIN, and
    /// snapshot isolation levels capture the current LSN.
    pub fn begin(&self, isolation: IsolationLevel) -> Result<TxnHandle> {
        let txn_id = self.wal.begin_transaction()?;
        let snapshot_lsn = match isolation {
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {
                self.wal.current_lsn()
            }
            _ => INVALID_LSN,
        };

        let handle: TxnHandle = Arc::new(Mutex::new(Transaction::new(
            txn_id,
            isolation,
            snapshot_lsn,
        )));

        let mut inner = self.inner.lock();
        inner.transactions.insert(txn_id, Arc::clone(&handle));
        inner.current = Some((txn_id, Arc::clone(&handle)));
        Ok(handle)
    }

    /// The transaction used by statements that run outside an explicit
    /// BEGIN.
    pub fn current(&self) -> Option<TxnHandle> {
        self.inner
            .lock()
            .current
            .as_ref()
            .map(|(_, handle)| Arc::clone(handle))
    }

    pub fn set_current(&self, handle: Option<TxnHandle>) {
        let entry = handle.map(|handle| {
            let id = handle.lock().id;
            (id, handle)
        });
        self.inner.lock().current = entry;
    }

    /// Commit: WAL force-flush, page flush, lock release, COMMITTED.
    /// SERIALIZABLE transactions are validated first; a conflict aborts
    /// the transaction and returns `SerializationConflict`.
    pub fn commit(&self, handle: &TxnHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut txn = handle.lock();

        if txn.state != TxnState::Active {
            return Err(Error::TxnNotActive(txn.id));
        }

        if txn.isolation == IsolationLevel::Serializable
            && self.serializable_conflict(&inner, &txn)
        {
            debug!("serializable validation failed for txn {}", txn.id);
            self.abort_locked(&mut inner, &mut txn)?;
            return Err(Error::SerializationConflict);
        }

        let commit_lsn = self.wal.commit_transaction(txn.id)?;

        for &page_id in &txn.modified_pages {
            match self.buffer_pool.flush_page(page_id) {
                Ok(()) => {}
                // An evicted page was already written back.
                Err(Error::NotResident(_)) => {}
                Err(err) => return Err(err),
            }
        }

        self.lock_manager.release_all(txn.id);
        txn.state = TxnState::Committed;
        txn.commit_lsn = commit_lsn;

        Self::clear_current_if(&mut inner, txn.id);
        Ok(())
    }

    /// Abort: discard in-memory changes, WAL abort, lock release.
    pub fn abort(&self, handle: &TxnHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut txn = handle.lock();

        if txn.state != TxnState::Active {
            return Err(Error::TxnNotActive(txn.id));
        }

        self.abort_locked(&mut inner, &mut txn)
    }

    fn abort_locked(&self, inner: &mut ManagerInner, txn: &mut Transaction) -> Result<()> {
        for &page_id in &txn.modified_pages {
            match self.buffer_pool.discard_page(page_id) {
                Ok(()) => {}
                Err(err) => warn!(
                    "abort of txn {} could not discard page {}: {}",
                    txn.id, page_id, err
                ),
            }
        }

        self.wal.abort_transaction(txn.id)?;
        self.lock_manager.release_all(txn.id);
        txn.state = TxnState::Aborted;

        Self::clear_current_if(inner, txn.id);
        Ok(())
    }

    fn clear_current_if(inner: &mut ManagerInner, txn_id: TxnId) {
        if inner.current.as_ref().is_some_and(|(id, _)| *id == txn_id) {
            inner.current = None;
        }
    }

    /// True when another transaction that committed after `txn`'s
    /// snapshot wrote an item `txn` read.
    fn serializable_conflict(&self, inner: &ManagerInner, txn: &Transaction) -> bool {
        for (&other_id, other_handle) in &inner.transactions {
            if other_id == txn.id {
                continue;
            }
            let other = other_handle.lock();
            if other.state != TxnState::Committed || other.commit_lsn <= txn.snapshot_lsn {
                continue;
            }
            if other.write_set.iter().any(|item| txn.read_set.contains(item)) {
                return true;
            }
        }
        false
    }

    /// May `reader` observe a row version written by `writer_id`?
    ///
    /// Unknown writers are bootstrap data from before this process
    /// started and are treated as committed.
    pub fn is_visible(&self, writer_id: TxnId, reader: &TxnHandle) -> bool {
        let (reader_id, isolation, snapshot_lsn) = {
            let reader = reader.lock();
            (reader.id, reader.isolation, reader.snapshot_lsn)
        };

        if writer_id == reader_id {
            return true;
        }
        if isolation == IsolationLevel::ReadUncommitted {
            return true;
        }

        let writer_handle = {
            let inner = self.inner.lock();
            inner.transactions.get(&writer_id).cloned()
        };
        let Some(writer_handle) = writer_handle else {
            return true;
        };
        let writer = writer_handle.lock();

        match isolation {
            IsolationLevel::ReadUncommitted => true,
            IsolationLevel::ReadCommitted => writer.state == TxnState::Committed,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {
                writer.state == TxnState::Committed && writer.commit_lsn < snapshot_lsn
            }
        }
    }

    /// Replay the log through the buffer pool. Run at open, before any
    /// transaction begins.
    pub fn recover(&self) -> Result<RecoveryInfo> {
        self.wal.recover(&self.buffer_pool)
    }

    pub fn active_count(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .transactions
            .values()
            .filter(|handle| handle.lock().state == TxnState::Active)
            .count()
    }
}
