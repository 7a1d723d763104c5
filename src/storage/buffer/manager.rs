use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::config::BufferPoolConfig;
use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;
use crate::storage::page::{PageGuard, ReadPageGuard, WritePageGuard};

/// Per-frame metadata. Guarded by the pool mutex, never by the frame latch:
/// pin counts and dirty flags must move atomically with the page table.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn new() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

/// All bookkeeping that must change together.
struct PoolInner {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruKReplacer,
    frame_meta: Vec<FrameMeta>,
    next_page_id: PageId,
}

/// The buffer pool: a fixed set of frames caching disk pages.
///
/// Frame bytes are guarded by each frame's latch (`PagePtr`'s `RwLock`);
/// everything else lives behind one pool-wide mutex.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<PagePtr>,
    inner: Mutex<PoolInner>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(
        config: BufferPoolConfig,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(config, disk_manager))
    }

    pub fn with_disk_manager(config: BufferPoolConfig, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(config.pool_size);
        let mut free_list = VecDeque::with_capacity(config.pool_size);
        let mut frame_meta = Vec::with_capacity(config.pool_size);

        for i in 0..config.pool_size {
            frames.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            frame_meta.push(FrameMeta::new());
            free_list.push_back(i as FrameId);
        }

        Self {
            pool_size: config.pool_size,
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
                replacer: LruKReplacer::new(config.pool_size, config.replacer_k),
                frame_meta,
                next_page_id: 0,
            }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page id, install it in a frame and pin it.
    /// The id counter only advances once a frame has been secured, so a
    /// request against a fully pinned pool does not consume an id.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self.acquire_frame(&mut inner)?;
        let page_id = inner.next_page_id;
        inner.next_page_id += 1;

        {
            let mut page = self.frames[frame_id as usize].write();
            page.data.fill(0);
            page.page_id = page_id;
        }

        let meta = &mut inner.frame_meta[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = true;

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        Ok((self.frames[frame_id as usize].clone(), page_id))
    }

    /// Fetch a page, reading it from disk on a miss. The returned page is
    /// pinned; callers must `unpin_page` when done (or use a guard).
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        // Hit: pin and return without touching the disk
        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let meta = &mut inner.frame_meta[frame_id as usize];
            meta.pin_count += 1;
            inner.replacer.record_access(frame_id);
            inner.replacer.set_evictable(frame_id, false);
            return Ok(self.frames[frame_id as usize].clone());
        }

        // Miss: secure a frame and read from disk
        let frame_id = self.acquire_frame(&mut inner)?;
        {
            let mut page = self.frames[frame_id as usize].write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page) {
                // The requested page was never installed; return the frame
                page.reset();
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        let meta = &mut inner.frame_meta[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        Ok(self.frames[frame_id as usize].clone())
    }

    /// Drop one pin. Returns false if the page is not resident or already
    /// unpinned. When the pin count reaches zero the frame becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        let meta = &mut inner.frame_meta[frame_id as usize];
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

    /// Write a resident page back to disk and clear its dirty flag.
    ///
    /// The page is pinned while its bytes go to disk so the frame cannot be
    /// remapped, and its latch is taken only after the pool mutex is
    /// released (a latch holder may itself be waiting on the pool mutex).
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let (frame_id, page) = {
            let mut inner = self.inner.lock();
            let Some(&frame_id) = inner.page_table.get(&page_id) else {
                return Ok(false);
            };
            inner.frame_meta[frame_id as usize].pin_count += 1;
            inner.replacer.set_evictable(frame_id, false);
            (frame_id, self.frames[frame_id as usize].clone())
        };

        let result = {
            let page = page.read();
            self.disk_manager.write_page(&page)
        };

        let mut inner = self.inner.lock();
        let meta = &mut inner.frame_meta[frame_id as usize];
        meta.pin_count -= 1;
        if result.is_ok() {
            meta.is_dirty = false;
        }
        let unpinned = meta.pin_count == 0;
        if unpinned {
            inner.replacer.set_evictable(frame_id, true);
        }
        result?;
        Ok(true)
    }

    /// Flush every resident page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let page_ids: Vec<PageId> = {
            let inner = self.inner.lock();
            inner.page_table.keys().copied().collect()
        };
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Drop a page from the pool. Returns true if the page was not resident
    /// or was successfully removed, false if it is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(true);
        };
        if inner.frame_meta[frame_id as usize].pin_count > 0 {
            return Ok(false);
        }

        // Pin count is zero, so no latch can be held on this frame and it
        // is safe to touch its bytes under the pool mutex
        if inner.frame_meta[frame_id as usize].is_dirty {
            let page = self.frames[frame_id as usize].read();
            self.disk_manager.write_page(&page)?;
        }

        inner.page_table.remove(&page_id);
        inner.replacer.remove(frame_id);
        self.frames[frame_id as usize].write().reset();
        inner.frame_meta[frame_id as usize] = FrameMeta::new();
        inner.free_list.push_back(frame_id);
        Ok(true)
    }

    /// Fetch wrapped in a pin-only guard.
    pub fn fetch_page_basic(self: &Arc<Self>, page_id: PageId) -> Result<PageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(PageGuard::new(self.clone(), page_id, page))
    }

    /// Fetch wrapped in a guard holding the frame's shared latch.
    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> Result<ReadPageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(ReadPageGuard::new(self.clone(), page_id, page))
    }

    /// Fetch wrapped in a guard holding the frame's exclusive latch.
    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> Result<WritePageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(WritePageGuard::new(self.clone(), page_id, page))
    }

    /// Allocate a new page wrapped in a pin-only guard.
    pub fn new_page_guarded(self: &Arc<Self>) -> Result<(PageGuard, PageId), BufferPoolError> {
        let (page, page_id) = self.new_page()?;
        Ok((PageGuard::new(self.clone(), page_id, page), page_id))
    }

    /// Pick a frame for a new resident: free list first, then eviction with
    /// dirty write-back. On I/O failure the victim stays resident and
    /// evictable, and the caller sees the error.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = inner.replacer.evict() else {
            return Err(BufferPoolError::PoolExhausted);
        };

        let victim_page_id = inner.frame_meta[frame_id as usize].page_id;
        debug_assert_ne!(victim_page_id, INVALID_PAGE_ID);

        if inner.frame_meta[frame_id as usize].is_dirty {
            let page = self.frames[frame_id as usize].read();
            if let Err(e) = self.disk_manager.write_page(&page) {
                drop(page);
                inner.replacer.record_access(frame_id);
                inner.replacer.set_evictable(frame_id, true);
                return Err(e.into());
            }
            inner.frame_meta[frame_id as usize].is_dirty = false;
        }

        debug!("evicting page {} from frame {}", victim_page_id, frame_id);
        inner.page_table.remove(&victim_page_id);
        inner.frame_meta[frame_id as usize] = FrameMeta::new();
        Ok(frame_id)
    }
}
