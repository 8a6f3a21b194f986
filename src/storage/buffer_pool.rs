//! # Buffer Pool
//!
//! A fixed-size cache of page frames with pin counts, LRU eviction, and
//! dirty write-back. The pool owns the [`FileManager`]; all disk I/O for
//! data pages happens under the single pool mutex, which serializes it.
//!
//! ## Frame Lifecycle
//!
//! ```text
//!        ┌───────────┐  fetch/new   ┌───────────┐
//!        │ free list │ ───────────> │  mapped   │<──┐ pin/unpin
//!        └───────────┘              │ (in page  │───┘
//!              ^                    │  table)   │
//!              │   delete_page      └───────────┘
//!              └────────────────────────┘
//! ```
//!
//! A mapped frame with pin count zero sits in the LRU list (front = most
//! recently used). Eviction prefers a free frame, then scans the LRU list
//! from the least recently used end for an unpinned victim; a dirty
//! victim is written back before its frame is reused. If every frame is
//! pinned the operation fails with `BufferPoolExhausted`, which almost
//! always means a caller is leaking guards.
//!
//! ## Scoped Guards
//!
//! [`fetch_page`](BufferPool::fetch_page) and
//! [`new_page`](BufferPool::new_page) return a [`PageGuard`]: an RAII
//! handle that unpins exactly once on drop, with a caller-set dirty flag.
//! Page content is shared with the guard through an `Arc<RwLock<Page>>`,
//! so guard holders read and write records without touching the pool
//! mutex. Pin counts guarantee a frame's `Arc` is never repurposed while
//! a guard is alive.
//!
//! ```ignore
//! let mut guard = pool.new_page()?;
//! guard.page_mut().insert_record(b"row")?;
//! guard.mark_dirty();
//! // drop unpins with dirty = true
//! ```

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use hashbrown::HashMap;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::DEFAULT_POOL_SIZE;
use crate::error::{Error, Result};
use crate::storage::{FileManager, Page, PageId, INVALID_PAGE_ID};

struct Frame {
    page: Arc<RwLock<Page>>,
    page_id: PageId,
    pin_count: u32,
}

impl Frame {
    fn empty() -> Self {
        Self {
            page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
        }
    }
}

struct PoolInner {
    file_manager: FileManager,
    frames: Vec<Frame>,
    /// PageId -> frame index, for every mapped page.
    page_table: HashMap<PageId, usize>,
    /// Frame indices, front = most recently used.
    lru: VecDeque<usize>,
    free_frames: Vec<usize>,
}

pub struct BufferPool {
    inner: Mutex<PoolInner>,
    pool_size: usize,
}

impl BufferPool {
    pub fn new(file_manager: FileManager, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        let frames = (0..pool_size).map(|_| Frame::empty()).collect();
        let free_frames = (0..pool_size).rev().collect();

        Self {
            inner: Mutex::new(PoolInner {
                file_manager,
                frames,
                page_table: HashMap::with_capacity(pool_size),
                lru: VecDeque::with_capacity(pool_size),
                free_frames,
            }),
            pool_size,
        }
    }

    pub fn with_default_size(file_manager: FileManager) -> Self {
        Self::new(file_manager, DEFAULT_POOL_SIZE)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of pages currently mapped to frames.
    pub fn resident_pages(&self) -> usize {
        self.inner.lock().page_table.len()
    }

    /// Pin a page, loading it from disk on a miss.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let mut inner = self.inner.lock();

        if let Some(&frame_idx) = inner.page_table.get(&page_id) {
            inner.frames[frame_idx].pin_count += 1;
            inner.touch(frame_idx);
            let page = Arc::clone(&inner.frames[frame_idx].page);
            return Ok(PageGuard::new(self, page, page_id));
        }

        let frame_idx = inner.claim_frame(self.pool_size)?;
        let page = match inner.file_manager.read_page(page_id) {
            Ok(page) => page,
            Err(err) => {
                inner.free_frames.push(frame_idx);
                return Err(err);
            }
        };

        let frame = &mut inner.frames[frame_idx];
        *frame.page.write() = page;
        frame.page_id = page_id;
        frame.pin_count = 1;
        let page = Arc::clone(&frame.page);

        inner.page_table.insert(page_id, frame_idx);
        inner.touch(frame_idx);
        Ok(PageGuard::new(self, page, page_id))
    }

    /// Allocate a fresh page on disk and pin an initialized frame for it.
    /// The guard starts dirty: a new page must reach disk through the
    /// caller's write path even if it stays empty.
    pub fn new_page(&self) -> Result<PageGuard<'_>> {
        let mut inner = self.inner.lock();

        let page_id = inner.file_manager.allocate_page()?;
        let frame_idx = match inner.claim_frame(self.pool_size) {
            Ok(idx) => idx,
            Err(err) => {
                inner.file_manager.deallocate_page(page_id)?;
                return Err(err);
            }
        };

        let frame = &mut inner.frames[frame_idx];
        let mut page = Page::new(page_id);
        page.set_dirty(true);
        *frame.page.write() = page;
        frame.page_id = page_id;
        frame.pin_count = 1;
        let page = Arc::clone(&frame.page);

        inner.page_table.insert(page_id, frame_idx);
        inner.touch(frame_idx);

        let mut guard = PageGuard::new(self, page, page_id);
        guard.mark_dirty();
        Ok(guard)
    }

    /// Drop one pin. `dirty` marks the page for write-back. Pin counts
    /// never go negative.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let frame_idx = *inner
            .page_table
            .get(&page_id)
            .ok_or(Error::NotResident(page_id))?;

        if dirty {
            inner.frames[frame_idx].page.write().set_dirty(true);
        }

        let frame = &mut inner.frames[frame_idx];
        if frame.pin_count == 0 {
            warn!("unpin of page {} with zero pin count", page_id);
        } else {
            frame.pin_count -= 1;
        }
        Ok(())
    }

    /// Write one page back to disk if dirty.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        let frame_idx = *inner
            .page_table
            .get(&page_id)
            .ok_or(Error::NotResident(page_id))?;
        inner.flush_frame(frame_idx)
    }

    /// Write every dirty page back, then flush the file header.
    pub fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let mapped: Vec<usize> = inner.page_table.values().copied().collect();
        for frame_idx in mapped {
            inner.flush_frame(frame_idx)?;
        }
        inner.file_manager.flush()
    }

    /// Remove a page from the pool and deallocate its id. Fails with
    /// `PagePinned` while any guard is outstanding.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();

        if let Some(&frame_idx) = inner.page_table.get(&page_id) {
            if inner.frames[frame_idx].pin_count > 0 {
                return Err(Error::PagePinned(page_id));
            }
            inner.release_frame(frame_idx);
        }

        inner.file_manager.deallocate_page(page_id)
    }

    /// Abort support: drop a resident, unpinned page without writing it
    /// back. The next fetch re-reads the last durable image from disk.
    pub fn discard_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();

        if let Some(&frame_idx) = inner.page_table.get(&page_id) {
            if inner.frames[frame_idx].pin_count > 0 {
                return Err(Error::PagePinned(page_id));
            }
            debug!("discarding page {} without write-back", page_id);
            inner.release_frame(frame_idx);
        }
        Ok(())
    }
}

impl PoolInner {
    fn touch(&mut self, frame_idx: usize) {
        if let Some(pos) = self.lru.iter().position(|&idx| idx == frame_idx) {
            self.lru.remove(pos);
        }
        self.lru.push_front(frame_idx);
    }

    /// Pick a victim frame: free list first, then the coldest unpinned
    /// mapped frame. Dirty victims are written back before reuse.
    fn claim_frame(&mut self, pool_size: usize) -> Result<usize> {
        if let Some(frame_idx) = self.free_frames.pop() {
            return Ok(frame_idx);
        }

        let victim = self
            .lru
            .iter()
            .rev()
            .copied()
            .find(|&idx| self.frames[idx].pin_count == 0)
            .ok_or(Error::BufferPoolExhausted(pool_size))?;

        let old_page_id = self.frames[victim].page_id;
        if self.frames[victim].page.read().is_dirty() {
            debug!("evicting dirty page {}, writing back", old_page_id);
            self.flush_frame(victim)?;
        }

        self.page_table.remove(&old_page_id);
        if let Some(pos) = self.lru.iter().position(|&idx| idx == victim) {
            self.lru.remove(pos);
        }
        Ok(victim)
    }

    fn flush_frame(&mut self, frame_idx: usize) -> Result<()> {
        let page_id = self.frames[frame_idx].page_id;
        let page_arc = Arc::clone(&self.frames[frame_idx].page);
        let mut page = page_arc.write();
        if page.is_dirty() {
            self.file_manager.write_page(page_id, &page)?;
            page.set_dirty(false);
        }
        Ok(())
    }

    fn release_frame(&mut self, frame_idx: usize) {
        let page_id = self.frames[frame_idx].page_id;
        self.page_table.remove(&page_id);
        if let Some(pos) = self.lru.iter().position(|&idx| idx == frame_idx) {
            self.lru.remove(pos);
        }
        self.frames[frame_idx].page_id = INVALID_PAGE_ID;
        *self.frames[frame_idx].page.write() = Page::new(INVALID_PAGE_ID);
        self.free_frames.push(frame_idx);
    }
}

/// RAII pin on a buffered page. Dropping the guard unpins exactly once,
/// passing the dirty flag set through [`mark_dirty`](PageGuard::mark_dirty)
/// (or implied by `page_mut`). Guards are meant to live for one logical
/// operation; holding many at once risks exhausting the pool. A guard
/// must drop on the thread that fetched it, so the type is `!Send`.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    page: Arc<RwLock<Page>>,
    page_id: PageId,
    dirty: bool,
    // Keeps the guard off other threads.
    _not_send: PhantomData<*const ()>,
}

impl<'a> PageGuard<'a> {
    fn new(pool: &'a BufferPool, page: Arc<RwLock<Page>>, page_id: PageId) -> Self {
        Self {
            pool,
            page,
            page_id,
            dirty: false,
            _not_send: PhantomData,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Mutable access; marks the guard dirty, since nearly every caller
    /// that takes a write lock mutates.
    pub fn page_mut(&mut self) -> RwLockWriteGuard<'_, Page> {
        self.dirty = true;
        self.page.write()
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.pool.unpin_page(self.page_id, self.dirty) {
            warn!("unpin of page {} failed on guard drop: {}", self.page_id, err);
        }
    }
}
