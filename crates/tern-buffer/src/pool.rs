//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tern_common::page::{PageId, PAGE_SIZE};
use tern_common::{Result, TernError};

/// Configuration for the buffer pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

impl BufferPoolConfig {
    /// Returns the total pool size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.num_frames * PAGE_SIZE
    }
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping
/// - Free frame list for new pages
/// - Pin counting with RAII guards
///
/// Pages are resident until freed. When every frame is occupied, page
/// allocation fails with `BufferPoolFull`; callers surface that error
/// after releasing their own pins.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: Mutex<HashMap<PageId, FrameId>>,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Next page ID to hand out. Page IDs are never reused.
    next_page_id: AtomicU32,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Arc<Self> {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames).map(|_| BufferFrame::new()).collect();

        // All frames start in the free list
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Arc::new(Self {
            config,
            frames,
            page_table: Mutex::new(HashMap::with_capacity(num_frames)),
            free_list: Mutex::new(free_list),
            next_page_id: AtomicU32::new(0),
        })
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.page_table.lock().len()
    }

    /// Checks if a page is in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.lock().contains_key(&page_id)
    }

    /// Returns the pin count of a page, or 0 if the page is absent.
    pub fn pin_count(&self, page_id: PageId) -> u32 {
        match self.page_table.lock().get(&page_id) {
            Some(frame_id) => self.frames[frame_id.0 as usize].pin_count(),
            None => 0,
        }
    }

    /// Returns the number of pages with a nonzero pin count.
    pub fn pinned_page_count(&self) -> usize {
        let table = self.page_table.lock();
        table
            .values()
            .filter(|frame_id| self.frames[frame_id.0 as usize].is_pinned())
            .count()
    }

    /// Allocates a fresh page and returns it pinned.
    ///
    /// The new page is zero-filled. Fails with `BufferPoolFull` when no
    /// frame is free.
    pub fn new_page(self: &Arc<Self>) -> Result<PageGuard> {
        let frame_id = self
            .free_list
            .lock()
            .pop()
            .ok_or(TernError::BufferPoolFull)?;

        let page_id = PageId(self.next_page_id.fetch_add(1, Ordering::AcqRel));

        let frame = &self.frames[frame_id.0 as usize];
        frame.set_page_id(Some(page_id));
        frame.pin();

        self.page_table.lock().insert(page_id, frame_id);

        Ok(PageGuard {
            pool: Arc::clone(self),
            page_id,
            frame_id,
            dirty: Cell::new(false),
        })
    }

    /// Pins an existing page and returns a guard for it.
    pub fn pin(self: &Arc<Self>, page_id: PageId) -> Result<PageGuard> {
        let table = self.page_table.lock();
        let frame_id = *table
            .get(&page_id)
            .ok_or(TernError::PageNotFound { page_id: page_id.0 })?;
        self.frames[frame_id.0 as usize].pin();
        drop(table);

        Ok(PageGuard {
            pool: Arc::clone(self),
            page_id,
            frame_id,
            dirty: Cell::new(false),
        })
    }

    /// Unpins a page, optionally marking it dirty. Invoked by guard drop.
    fn unpin(&self, page_id: PageId, frame_id: FrameId, dirty: bool) {
        debug_assert!(self.page_table.lock().get(&page_id) == Some(&frame_id));
        let frame = &self.frames[frame_id.0 as usize];
        if dirty {
            frame.set_dirty(true);
        }
        frame.unpin();
    }

    /// Removes a page from the pool and returns its frame to the free list.
    ///
    /// Fails with `PagePinned` if the page is still held, and
    /// `PageNotFound` if the page was never allocated or already freed.
    pub fn free_page(&self, page_id: PageId) -> Result<()> {
        let mut table = self.page_table.lock();
        let frame_id = *table
            .get(&page_id)
            .ok_or(TernError::PageNotFound { page_id: page_id.0 })?;

        let frame = &self.frames[frame_id.0 as usize];
        if frame.is_pinned() {
            return Err(TernError::PagePinned { page_id: page_id.0 });
        }

        table.remove(&page_id);
        frame.reset();
        self.free_list.lock().push(frame_id);
        Ok(())
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let table = self.page_table.lock();
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;

        for frame_id in table.values() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_list.lock().len(),
            used_frames: table.len(),
            pinned_frames,
            dirty_frames,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

/// RAII pin on a buffer page.
///
/// Holding a guard keeps the page resident; dropping it unpins the page,
/// reporting the dirty flag accumulated through `mark_dirty`. This makes
/// pin release automatic on every control-flow path, including errors.
pub struct PageGuard {
    pool: Arc<BufferPool>,
    page_id: PageId,
    frame_id: FrameId,
    dirty: Cell<bool>,
}

impl PageGuard {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Records that the page has been written to. The dirty flag is
    /// applied when the guard is dropped.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }

    /// Returns read access to the page data.
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.pool.frames[self.frame_id.0 as usize].read_data()
    }

    /// Returns write access to the page data. Callers must also
    /// `mark_dirty` for the write to be recorded at unpin time.
    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.pool.frames[self.frame_id.0 as usize].write_data()
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.pool.unpin(self.page_id, self.frame_id, self.dirty.get());
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("dirty", &self.dirty.get())
            .finish()
    }
}
