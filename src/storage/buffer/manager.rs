use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use log::debug;

use crate::common::config::DbConfig;
use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_table::ExtendibleHashTable;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

/// One slot of the pool. A frame either holds a page (pin_count and dirty
/// flag apply to that page) or sits on the free list with an invalid page.
struct FrameMeta {
    page: PagePtr,
    pin_count: u32,
    is_dirty: bool,
}

struct PoolInner {
    frames: Vec<FrameMeta>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruKReplacer,
    next_page_id: PageId,
}

/// Fixed-size page cache over the disk manager.
///
/// Every public operation runs under one pool-wide mutex. Page contents are
/// handed out as `PagePtr` (Arc over RwLock), so callers read and write page
/// bytes outside the pool latch while the pin count keeps the frame from
/// being recycled underneath them.
pub struct BufferPoolManager {
    pool_size: usize,
    inner: Mutex<PoolInner>,
    disk_manager: Arc<DiskManager>,
}

const PAGE_TABLE_BUCKET_SIZE: usize = 4;

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Self::with_disk_manager(pool_size, replacer_k, disk_manager)
    }

    pub fn with_config(
        config: &DbConfig,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        Self::new(config.pool_size, config.replacer_k, db_path)
    }

    pub fn with_disk_manager(
        pool_size: usize,
        replacer_k: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Result<Self, BufferPoolError> {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(FrameMeta {
                page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(i as FrameId);
        }

        // Page 0 is the header page; ordinary allocation starts past it and
        // resumes past whatever an existing file already holds.
        let next_page_id = disk_manager.num_pages()?.max(1) as PageId;

        Ok(Self {
            pool_size,
            inner: Mutex::new(PoolInner {
                frames,
                page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
                free_list,
                replacer: LruKReplacer::new(pool_size, replacer_k),
                next_page_id,
            }),
            disk_manager,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page and pin it into a frame.
    ///
    /// Fails with `BufferExhausted` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PageId, PagePtr), BufferPoolError> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let frame_id = Self::acquire_frame(inner, &self.disk_manager)?;
        let page_id = inner.next_page_id;
        inner.next_page_id += 1;

        let meta = &mut inner.frames[frame_id as usize];
        {
            let mut page = meta.page.write();
            page.reset();
            page.page_id = page_id;
        }
        meta.pin_count = 1;
        meta.is_dirty = false;
        let page_ptr = meta.page.clone();

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        Ok((page_id, page_ptr))
    }

    /// Pin the page into the pool, reading it from disk on a miss.
    ///
    /// A hit never touches the disk; write-back happens only on eviction or
    /// explicit flush.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        if let Some(frame_id) = inner.page_table.find(&page_id) {
            let meta = &mut inner.frames[frame_id as usize];
            meta.pin_count += 1;
            let page_ptr = meta.page.clone();
            inner.replacer.record_access(frame_id);
            inner.replacer.set_evictable(frame_id, false);
            return Ok(page_ptr);
        }

        let frame_id = Self::acquire_frame(inner, &self.disk_manager)?;
        let meta = &mut inner.frames[frame_id as usize];
        {
            let mut page = meta.page.write();
            page.reset();
            self.disk_manager.read_page(page_id, &mut page)?;
        }
        meta.pin_count = 1;
        meta.is_dirty = false;
        let page_ptr = meta.page.clone();

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        Ok(page_ptr)
    }

    /// Drop one pin on the page, folding `is_dirty` into the frame's flag.
    ///
    /// Returns false if the page is not resident or was not pinned. The
    /// dirty flag is only ever OR-ed here; write-back clears it.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let Some(frame_id) = inner.page_table.find(&page_id) else {
            return false;
        };
        let meta = &mut inner.frames[frame_id as usize];
        if meta.pin_count == 0 {
            return false;
        }
        meta.pin_count -= 1;
        meta.is_dirty |= is_dirty;
        if meta.pin_count == 0 {
            inner.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write the page back to disk (dirty or not) and clear its dirty flag.
    ///
    /// Returns whether the page was resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let Some(frame_id) = inner.page_table.find(&page_id) else {
            return Ok(false);
        };
        let meta = &mut inner.frames[frame_id as usize];
        {
            let page = meta.page.read();
            self.disk_manager.write_page(&page)?;
        }
        meta.is_dirty = false;
        Ok(true)
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        for meta in inner.frames.iter_mut() {
            let page_id = meta.page.read().page_id;
            if page_id == INVALID_PAGE_ID {
                continue;
            }
            {
                let page = meta.page.read();
                self.disk_manager.write_page(&page)?;
            }
            meta.is_dirty = false;
        }
        Ok(())
    }

    /// Evict the page from the pool and recycle its frame.
    ///
    /// Returns false if the page is currently pinned; a page that is not
    /// resident is trivially deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let Some(frame_id) = inner.page_table.find(&page_id) else {
            return Ok(true);
        };
        let meta = &mut inner.frames[frame_id as usize];
        if meta.pin_count > 0 {
            return Ok(false);
        }

        meta.page.write().reset();
        meta.is_dirty = false;
        inner.page_table.remove(&page_id);
        inner.replacer.remove(frame_id);
        inner.free_list.push_back(frame_id);
        Ok(true)
    }

    /// Find a frame to bind a page into: free list first, then eviction.
    ///
    /// A dirty victim is written back synchronously before its frame is
    /// handed out.
    fn acquire_frame(
        inner: &mut PoolInner,
        disk_manager: &DiskManager,
    ) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = inner
            .replacer
            .evict()
            .ok_or(BufferPoolError::BufferExhausted)?;

        let meta = &mut inner.frames[frame_id as usize];
        let old_page_id = meta.page.read().page_id;
        if meta.is_dirty {
            let page = meta.page.read();
            disk_manager.write_page(&page)?;
            debug!("evicted dirty page {} from frame {}", old_page_id, frame_id);
        }
        meta.is_dirty = false;

        if old_page_id != INVALID_PAGE_ID {
            inner.page_table.remove(&old_page_id);
        }
        Ok(frame_id)
    }
}
