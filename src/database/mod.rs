//! # Database Facade
//!
//! A [`Database`] value owns every subsystem (file manager inside the
//! buffer pool, WAL, lock manager, transaction manager, catalog) and is
//! passed by reference to the query layer. There are no process
//! globals.
//!
//! ## Open Sequence
//!
//! 1. open the data file (validating magic/version) and wrap it in the
//!    buffer pool
//! 2. open the WAL and run recovery: redo committed changes, undo
//!    unresolved ones
//! 3. load the catalog and rebuild each table's primary index from its
//!    page chain
//!
//! ## Close Sequence
//!
//! `close` (also run best-effort on drop) flushes all dirty pages,
//! saves the catalog, and flushes the WAL. A process that skips close
//! loses nothing committed: recovery replays the log on the next open.

mod builder;

pub use builder::DatabaseBuilder;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use crate::concurrency::{IsolationLevel, LockManager, TransactionManager, TxnHandle};
use crate::config::DatabaseOptions;
use crate::error::Result;
use crate::schema::Catalog;
use crate::storage::wal::RecoveryInfo;
use crate::storage::{BufferPool, FileManager, Lsn, WalManager};

pub struct Database {
    base_path: PathBuf,
    options: DatabaseOptions,
    buffer_pool: Arc<BufferPool>,
    wal: Arc<WalManager>,
    lock_manager: Arc<LockManager>,
    txn_manager: TransactionManager,
    catalog: Catalog,
    recovery: RecoveryInfo,
}

impl Database {
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Open with default options. `path` is the base name; the data,
    /// WAL, and catalog files derive from it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path.as_ref().to_path_buf(), DatabaseOptions::default())
    }

    pub(crate) fn open_with_options(path: PathBuf, options: DatabaseOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file_manager = FileManager::open(path.with_extension("db"))?;
        let buffer_pool = Arc::new(BufferPool::new(file_manager, options.pool_size));

        let wal = Arc::new(WalManager::open(path.with_extension("wal"))?);
        let recovery = wal.recover(&buffer_pool)?;

        let lock_manager = Arc::new(LockManager::new(options.lock_timeout));
        let txn_manager = TransactionManager::new(
            Arc::clone(&wal),
            Arc::clone(&lock_manager),
            Arc::clone(&buffer_pool),
        );

        let catalog = Catalog::new(options.btree_order);
        catalog.load(path.with_extension("cat"))?;
        for table in catalog.table_names() {
            catalog.rebuild_index(&table, &buffer_pool)?;
        }

        Ok(Self {
            base_path: path,
            options,
            buffer_pool,
            wal,
            lock_manager,
            txn_manager,
            catalog,
            recovery,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// What the WAL replayed while opening.
    pub fn recovery_info(&self) -> &RecoveryInfo {
        &self.recovery
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffer_pool
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn txn_manager(&self) -> &TransactionManager {
        &self.txn_manager
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn begin(&self, isolation: IsolationLevel) -> Result<TxnHandle> {
        self.txn_manager.begin(isolation)
    }

    pub fn commit(&self, txn: &TxnHandle) -> Result<()> {
        self.txn_manager.commit(txn)
    }

    pub fn abort(&self, txn: &TxnHandle) -> Result<()> {
        self.txn_manager.abort(txn)
    }

    /// Force a WAL checkpoint and write every dirty page back. After
    /// this, recovery starts from the checkpoint record.
    pub fn checkpoint(&self) -> Result<Lsn> {
        let lsn = self.wal.checkpoint()?;
        self.buffer_pool.flush_all()?;
        Ok(lsn)
    }

    /// Flush pages, save the catalog, and checkpoint the WAL so the
    /// next open has nothing to replay.
    pub fn close(&self) -> Result<()> {
        self.buffer_pool.flush_all()?;
        self.catalog.save(self.base_path.with_extension("cat"))?;
        self.wal.checkpoint()?;
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("close on drop failed: {}", err);
        }
    }
}
