use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::config::BufferPoolConfig;
use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::container::ExtendibleHashTable;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

/// Per-frame bookkeeping, guarded by the pool latch
struct FrameMeta {
    page: PagePtr,
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

struct PoolInner {
    frames: Vec<FrameMeta>,
    /// Resident page_id -> frame_id directory
    page_table: ExtendibleHashTable<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruKReplacer,
}

/// Token for a pinned page. The holder may latch and use the page content
/// until it calls [`PagePin::unpin`]; dropping the token without unpinning
/// is a caller bug and trips an assertion in debug builds.
pub struct PagePin {
    page_id: PageId,
    page: PagePtr,
    released: bool,
}

impl PagePin {
    fn new(page_id: PageId, page: PagePtr) -> Self {
        Self {
            page_id,
            page,
            released: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page(&self) -> &PagePtr {
        &self.page
    }

    /// Return the pin to the pool, reporting whether the content was changed
    pub fn unpin(mut self, pool: &BufferPoolManager, is_dirty: bool) -> bool {
        self.released = true;
        pool.unpin_page(self.page_id, is_dirty)
    }
}

impl Drop for PagePin {
    fn drop(&mut self) {
        debug_assert!(
            self.released,
            "pin on page {} dropped without an unpin",
            self.page_id
        );
    }
}

/// Fixed-size in-memory page cache mediating all disk I/O.
///
/// A single pool latch serializes every public operation; page content is
/// protected separately by the per-page reader/writer latch, which callers
/// may only take while holding a pin.
pub struct BufferPoolManager {
    pool_size: usize,
    disk_manager: Arc<DiskManager>,
    inner: Mutex<PoolInner>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let config = BufferPoolConfig {
            pool_size,
            ..BufferPoolConfig::default()
        };
        Self::with_config(config, db_path)
    }

    pub fn with_config(
        config: BufferPoolConfig,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        let mut frames = Vec::with_capacity(config.pool_size);
        let mut free_list = VecDeque::with_capacity(config.pool_size);

        for i in 0..config.pool_size {
            frames.push(FrameMeta {
                page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(i as FrameId);
        }

        Ok(Self {
            pool_size: config.pool_size,
            disk_manager,
            inner: Mutex::new(PoolInner {
                frames,
                page_table: ExtendibleHashTable::new(config.page_table_bucket_size),
                free_list,
                replacer: LruKReplacer::new(config.pool_size, config.replacer_k),
            }),
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Allocate a fresh page id and pin an empty frame for it
    pub fn new_page(&self) -> Result<PagePin, BufferPoolError> {
        let inner = &mut *self.inner.lock();

        let frame_id = self.acquire_frame(inner)?;
        let page_id = self.disk_manager.allocate_page();

        let frame = &mut inner.frames[frame_id as usize];
        {
            let mut page = frame.page.write();
            page.data.fill(0);
            page.page_id = page_id;
        }
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id)?;
        inner.replacer.set_evictable(frame_id, false);

        Ok(PagePin::new(page_id, inner.frames[frame_id as usize].page.clone()))
    }

    /// Pin a page, reading it from disk if it is not resident
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePin, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "Cannot fetch invalid page ID".to_string(),
            ));
        }

        let inner = &mut *self.inner.lock();

        if let Some(frame_id) = inner.page_table.find(&page_id) {
            inner.replacer.record_access(frame_id)?;
            inner.replacer.set_evictable(frame_id, false);
            let frame = &mut inner.frames[frame_id as usize];
            frame.pin_count += 1;
            return Ok(PagePin::new(page_id, frame.page.clone()));
        }

        let frame_id = self.acquire_frame(inner)?;
        {
            let frame = &inner.frames[frame_id as usize];
            let mut page = frame.page.write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page.data) {
                drop(page);
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
            page.page_id = page_id;
        }

        let frame = &mut inner.frames[frame_id as usize];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id)?;
        inner.replacer.set_evictable(frame_id, false);

        Ok(PagePin::new(page_id, inner.frames[frame_id as usize].page.clone()))
    }

    /// Drop one pin on a page, folding in whether the caller dirtied it.
    /// Returns false if the page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = &mut *self.inner.lock();

        let Some(frame_id) = inner.page_table.find(&page_id) else {
            return false;
        };
        let frame = &mut inner.frames[frame_id as usize];
        if frame.pin_count == 0 {
            return false;
        }

        frame.pin_count -= 1;
        // The dirty bit is sticky: a clean unpin never clears it
        frame.is_dirty |= is_dirty;
        if frame.pin_count == 0 {
            inner.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write a resident page to disk and clear its dirty bit.
    /// Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let inner = &mut *self.inner.lock();
        Self::flush_frame(inner, &self.disk_manager, page_id)
    }

    /// Write every resident page to disk
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let inner = &mut *self.inner.lock();
        let resident: Vec<PageId> = inner
            .frames
            .iter()
            .map(|f| f.page_id)
            .filter(|&id| id != INVALID_PAGE_ID)
            .collect();
        for page_id in resident {
            Self::flush_frame(inner, &self.disk_manager, page_id)?;
        }
        Ok(())
    }

    /// Evict a page from the pool and hand its id back to the disk manager.
    /// Returns false if the page is pinned; a non-resident page counts as
    /// already deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let inner = &mut *self.inner.lock();

        let Some(frame_id) = inner.page_table.find(&page_id) else {
            return Ok(true);
        };
        if inner.frames[frame_id as usize].pin_count > 0 {
            return Ok(false);
        }

        inner.replacer.remove(frame_id);
        inner.page_table.remove(&page_id);

        let frame = &mut inner.frames[frame_id as usize];
        frame.page.write().reset();
        frame.page_id = INVALID_PAGE_ID;
        frame.pin_count = 0;
        frame.is_dirty = false;

        inner.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);
        Ok(true)
    }

    /// Find a frame for a new resident, evicting a victim if the free list
    /// is empty. A dirty victim is written out before its frame is reused.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let victim = inner.replacer.evict().ok_or(BufferPoolError::NoFreeFrames)?;
        let frame = &mut inner.frames[victim as usize];
        let old_page_id = frame.page_id;

        if frame.is_dirty {
            debug!("writing back dirty page {} before eviction", old_page_id);
            let page = frame.page.read();
            self.disk_manager.write_page(old_page_id, &page.data)?;
        }

        frame.page.write().reset();
        frame.page_id = INVALID_PAGE_ID;
        frame.pin_count = 0;
        frame.is_dirty = false;

        inner.page_table.remove(&old_page_id);
        Ok(victim)
    }

    fn flush_frame(
        inner: &mut PoolInner,
        disk_manager: &DiskManager,
        page_id: PageId,
    ) -> Result<bool, BufferPoolError> {
        let Some(frame_id) = inner.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &mut inner.frames[frame_id as usize];
        {
            let page = frame.page.read();
            disk_manager.write_page(page_id, &page.data)?;
        }
        frame.is_dirty = false;
        Ok(true)
    }
}
