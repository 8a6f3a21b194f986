//! # Lock Manager
//!
//! Queued shared/exclusive locks on table, page, and row resources.
//! Requests are granted in queue order within mode compatibility: any
//! number of SHARED holders, or a single EXCLUSIVE holder. A request
//! that cannot be granted immediately waits on the queue's condition
//! variable until a release grants it or its deadline passes.
//!
//! ## Grant Rules
//!
//! ```text
//! request   queue state                          outcome
//! --------  -----------------------------------  -------
//! SHARED    no exclusive holder, no exclusive    granted
//!           waiter ahead in the queue
//! SHARED    exclusive holder or waiter present   waits
//! EXCLUSIVE no holders at all                    granted
//! EXCLUSIVE anything held                        waits
//! ```
//!
//! Refusing a fresh SHARED request while an EXCLUSIVE waiter sits in the
//! queue keeps writers from starving behind a stream of readers. The
//! wake-up sweep that runs on every release walks the queue in order,
//! granting every compatible request and stopping once it grants an
//! exclusive.
//!
//! ## Deadlock Detection
//!
//! [`detect_deadlock`](LockManager::detect_deadlock) builds the wait-for
//! graph (an edge from each waiting transaction to each holder of the
//! same resource) and runs a DFS with a recursion stack. It is a
//! read-only query: victim selection is the caller's policy, typically
//! "abort the transaction that observed the cycle".
//!
//! ## Locking Internals
//!
//! One mutex guards the whole lock table; every queue's condvar waits on
//! that same mutex. `acquire` is the only call in the engine that blocks
//! for longer than a bounded critical section.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use log::debug;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

use crate::config::DEFAULT_LOCK_TIMEOUT;
use crate::error::{Error, Result};
use crate::storage::{PageId, SlotId, TableId, TxnId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockStatus {
    Waiting,
    Granted,
}

/// A lockable resource at one of three granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Table(TableId),
    Page(TableId, PageId),
    Row(TableId, PageId, SlotId),
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table(t) => write!(f, "table {}", t),
            Self::Page(t, p) => write!(f, "table {} page {}", t, p),
            Self::Row(t, p, s) => write!(f, "table {} page {} row {}", t, p, s),
        }
    }
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    status: LockStatus,
}

#[derive(Debug, Default)]
struct LockQueue {
    requests: Vec<LockRequest>,
    shared_count: usize,
    has_exclusive: bool,
    condvar: Arc<Condvar>,
}

impl LockQueue {
    fn granted(&self, txn_id: TxnId) -> Option<&LockRequest> {
        self.requests
            .iter()
            .find(|r| r.txn_id == txn_id && r.status == LockStatus::Granted)
    }

    fn has_waiting_exclusive(&self) -> bool {
        self.requests
            .iter()
            .any(|r| r.mode == LockMode::Exclusive && r.status == LockStatus::Waiting)
    }

    /// Mode compatibility against the current counters. The fairness
    /// check for fresh shared arrivals happens in `acquire`.
    fn compatible(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => !self.has_exclusive,
            LockMode::Exclusive => !self.has_exclusive && self.shared_count == 0,
        }
    }

    fn grant(&mut self, idx: usize) {
        self.requests[idx].status = LockStatus::Granted;
        match self.requests[idx].mode {
            LockMode::Shared => self.shared_count += 1,
            LockMode::Exclusive => self.has_exclusive = true,
        }
    }

    /// Walk waiting requests in order, granting every compatible one;
    /// stop after granting an exclusive.
    fn sweep(&mut self) {
        for idx in 0..self.requests.len() {
            if self.requests[idx].status != LockStatus::Waiting {
                continue;
            }
            if !self.compatible(self.requests[idx].mode) {
                continue;
            }
            let was_exclusive = self.requests[idx].mode == LockMode::Exclusive;
            self.grant(idx);
            if was_exclusive {
                break;
            }
        }
        self.condvar.notify_all();
    }

    fn remove_request(&mut self, txn_id: TxnId) {
        if let Some(idx) = self.requests.iter().position(|r| r.txn_id == txn_id) {
            let request = self.requests.remove(idx);
            if request.status == LockStatus::Granted {
                match request.mode {
                    LockMode::Shared => self.shared_count -= 1,
                    LockMode::Exclusive => self.has_exclusive = false,
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct LockTables {
    queues: HashMap<ResourceId, LockQueue>,
    /// Per-transaction resource index so release_all is a single pass.
    txn_locks: HashMap<TxnId, SmallVec<[ResourceId; 8]>>,
}

pub struct LockManager {
    tables: Mutex<LockTables>,
    default_timeout: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl LockManager {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            tables: Mutex::new(LockTables::default()),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Acquire `mode` on `resource`, blocking up to `timeout`. A lock
    /// already held in a sufficient mode returns immediately; a shared
    /// hold with an exclusive request attempts an upgrade.
    pub fn acquire(
        &self,
        txn_id: TxnId,
        resource: ResourceId,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<()> {
        let mut tables = self.tables.lock();

        if let Some(queue) = tables.queues.get(&resource) {
            if let Some(held) = queue.granted(txn_id) {
                if held.mode == LockMode::Exclusive || mode == LockMode::Shared {
                    return Ok(());
                }
                return Self::upgrade_locked(&mut tables, txn_id, resource);
            }
        }

        let queue = tables.queues.entry(resource).or_default();
        let immediate = queue.compatible(mode)
            && !(mode == LockMode::Shared && queue.has_waiting_exclusive());

        queue.requests.push(LockRequest {
            txn_id,
            mode,
            status: LockStatus::Waiting,
        });

        if immediate {
            let idx = queue.requests.len() - 1;
            queue.grant(idx);
            tables.txn_locks.entry(txn_id).or_default().push(resource);
            return Ok(());
        }

        let condvar = Arc::clone(&queue.condvar);
        tables.txn_locks.entry(txn_id).or_default().push(resource);
        let deadline = Instant::now() + timeout;

        loop {
            let granted = tables
                .queues
                .get(&resource)
                .and_then(|q| q.granted(txn_id))
                .is_some();
            if granted {
                return Ok(());
            }

            if condvar.wait_until(&mut tables, deadline).timed_out() {
                let granted_late = tables
                    .queues
                    .get(&resource)
                    .and_then(|q| q.granted(txn_id))
                    .is_some();
                if granted_late {
                    return Ok(());
                }

                if let Some(queue) = tables.queues.get_mut(&resource) {
                    queue.remove_request(txn_id);
                    queue.sweep();
                }
                if let Some(locks) = tables.txn_locks.get_mut(&txn_id) {
                    locks.retain(|r| *r != resource);
                }
                debug!("txn {} timed out waiting for {}", txn_id, resource);
                return Err(Error::LockTimeout(resource.to_string()));
            }
        }
    }

    /// Release one granted lock and wake compatible waiters.
    pub fn release(&self, txn_id: TxnId, resource: ResourceId) -> Result<()> {
        let mut tables = self.tables.lock();

        let queue = tables
            .queues
            .get_mut(&resource)
            .ok_or_else(|| Error::LockNotHeld(resource.to_string()))?;
        if queue.granted(txn_id).is_none() {
            return Err(Error::LockNotHeld(resource.to_string()));
        }

        queue.remove_request(txn_id);
        queue.sweep();
        if queue.requests.is_empty() {
            tables.queues.remove(&resource);
        }

        if let Some(locks) = tables.txn_locks.get_mut(&txn_id) {
            locks.retain(|r| *r != resource);
            if locks.is_empty() {
                tables.txn_locks.remove(&txn_id);
            }
        }
        Ok(())
    }

    /// Release everything a transaction holds or waits for. Used by
    /// commit and abort; unknown transactions are a no-op.
    pub fn release_all(&self, txn_id: TxnId) {
        let mut tables = self.tables.lock();

        let Some(resources) = tables.txn_locks.remove(&txn_id) else {
            return;
        };

        for resource in resources {
            if let Some(queue) = tables.queues.get_mut(&resource) {
                queue.remove_request(txn_id);
                queue.sweep();
                if queue.requests.is_empty() {
                    tables.queues.remove(&resource);
                }
            }
        }
    }

    /// Promote a shared hold to exclusive. Succeeds only when the caller
    /// is the sole shared holder and no exclusive lock exists.
    pub fn upgrade(&self, txn_id: TxnId, resource: ResourceId) -> Result<()> {
        let mut tables = self.tables.lock();
        Self::upgrade_locked(&mut tables, txn_id, resource)
    }

    fn upgrade_locked(
        tables: &mut LockTables,
        txn_id: TxnId,
        resource: ResourceId,
    ) -> Result<()> {
        let queue = tables
            .queues
            .get_mut(&resource)
            .ok_or_else(|| Error::LockNotHeld(resource.to_string()))?;

        let idx = queue
            .requests
            .iter()
            .position(|r| r.txn_id == txn_id && r.status == LockStatus::Granted)
            .ok_or_else(|| Error::LockNotHeld(resource.to_string()))?;

        if queue.requests[idx].mode == LockMode::Exclusive {
            return Ok(());
        }

        if queue.shared_count == 1 && !queue.has_exclusive {
            queue.requests[idx].mode = LockMode::Exclusive;
            queue.shared_count -= 1;
            queue.has_exclusive = true;
            return Ok(());
        }

        Err(Error::LockUpgradeBlocked(resource.to_string()))
    }

    /// Does `txn_id` hold a lock on `resource` at least as strong as
    /// `mode`?
    pub fn holds(&self, txn_id: TxnId, resource: ResourceId, mode: LockMode) -> bool {
        let tables = self.tables.lock();
        let Some(queue) = tables.queues.get(&resource) else {
            return false;
        };
        match queue.granted(txn_id) {
            Some(request) => mode == LockMode::Shared || request.mode == LockMode::Exclusive,
            None => false,
        }
    }

    /// Build the wait-for graph and report whether any cycle exists.
    /// Read-only: picking a victim to abort is the caller's policy.
    pub fn detect_deadlock(&self) -> bool {
        let tables = self.tables.lock();

        let mut wait_for: HashMap<TxnId, Vec<TxnId>> = HashMap::new();
        for queue in tables.queues.values() {
            let holders: Vec<TxnId> = queue
                .requests
                .iter()
                .filter(|r| r.status == LockStatus::Granted)
                .map(|r| r.txn_id)
                .collect();
            for waiter in queue
                .requests
                .iter()
                .filter(|r| r.status == LockStatus::Waiting)
            {
                for &holder in &holders {
                    if holder != waiter.txn_id {
                        wait_for.entry(waiter.txn_id).or_default().push(holder);
                    }
                }
            }
        }

        let mut visited: HashMap<TxnId, ()> = HashMap::new();
        let mut on_stack: HashMap<TxnId, ()> = HashMap::new();

        fn has_cycle(
            txn: TxnId,
            wait_for: &HashMap<TxnId, Vec<TxnId>>,
            visited: &mut HashMap<TxnId, ()>,
            on_stack: &mut HashMap<TxnId, ()>,
        ) -> bool {
            visited.insert(txn, ());
            on_stack.insert(txn, ());

            if let Some(neighbors) = wait_for.get(&txn) {
                for &next in neighbors {
                    if !visited.contains_key(&next) {
                        if has_cycle(next, wait_for, visited, on_stack) {
                            return true;
                        }
                    } else if on_stack.contains_key(&next) {
                        return true;
                    }
                }
            }

            on_stack.remove(&txn);
            false
        }

        for &txn in wait_for.keys() {
            if !visited.contains_key(&txn) && has_cycle(txn, &wait_for, &mut visited, &mut on_stack)
            {
                debug!("wait-for cycle involving txn {}", txn);
                return true;
            }
        }
        false
    }

    // Granularity sugar, all using the default timeout.

    pub fn lock_table(&self, txn_id: TxnId, table: TableId, mode: LockMode) -> Result<()> {
        self.acquire(txn_id, ResourceId::Table(table), mode, self.default_timeout)
    }

    pub fn unlock_table(&self, txn_id: TxnId, table: TableId) -> Result<()> {
        self.release(txn_id, ResourceId::Table(table))
    }

    pub fn lock_page(
        &self,
        txn_id: TxnId,
        table: TableId,
        page: PageId,
        mode: LockMode,
    ) -> Result<()> {
        self.acquire(
            txn_id,
            ResourceId::Page(table, page),
            mode,
            self.default_timeout,
        )
    }

    pub fn unlock_page(&self, txn_id: TxnId, table: TableId, page: PageId) -> Result<()> {
        self.release(txn_id, ResourceId::Page(table, page))
    }

    pub fn lock_row(
        &self,
        txn_id: TxnId,
        table: TableId,
        page: PageId,
        slot: SlotId,
        mode: LockMode,
    ) -> Result<()> {
        self.acquire(
            txn_id,
            ResourceId::Row(table, page, slot),
            mode,
            self.default_timeout,
        )
    }

    pub fn unlock_row(
        &self,
        txn_id: TxnId,
        table: TableId,
        page: PageId,
        slot: SlotId,
    ) -> Result<()> {
        self.release(txn_id, ResourceId::Row(table, page, slot))
    }
}
