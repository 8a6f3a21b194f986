//! # Database Builder
//!
//! Fluent configuration for opening a database. Every knob has a
//! sensible default; `path` is the only required setting.
//!
//! ```ignore
//! let db = Database::builder()
//!     .path("./mydb")
//!     .pool_size(128)
//!     .btree_order(8)
//!     .lock_timeout(Duration::from_secs(2))
//!     .open()?;
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::DatabaseOptions;
use crate::database::Database;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct DatabaseBuilder {
    path: Option<PathBuf>,
    options: DatabaseOptions,
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base path for the database files; `<path>.db`, `<path>.wal`, and
    /// `<path>.cat` are derived from it.
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Number of buffer-pool frames (default 64, minimum 1).
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.options.pool_size = pool_size.max(1);
        self
    }

    /// B+ tree order for table indexes (default 4, minimum 3).
    pub fn btree_order(mut self, order: usize) -> Self {
        self.options.btree_order = order.max(crate::config::MIN_BTREE_ORDER);
        self
    }

    /// Default deadline for lock acquisition (default 5 s).
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.options.lock_timeout = timeout;
        self
    }

    pub fn open(self) -> Result<Database> {
        let path = self
            .path
            .ok_or_else(|| Error::Catalog("no database path configured".into()))?;
        Database::open_with_options(path, self.options)
    }
}
