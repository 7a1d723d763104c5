use std::sync::Arc;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::types::{Page, PageId, PagePtr};
use crate::storage::buffer::BufferPoolManager;

/// Pin-only guard: keeps the page resident for as long as it lives and
/// unpins on drop. Latch the page through `read()` / `write()` for access.
pub struct PageGuard {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    // Some until dropped
    page: Option<PagePtr>,
    is_dirty: bool,
}

impl PageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, page: PagePtr) -> Self {
        Self {
            bpm,
            page_id,
            page: Some(page),
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Take the shared latch for the duration of the returned borrow.
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.as_ref().expect("guard already dropped").read()
    }

    /// Take the exclusive latch; the page will be unpinned dirty.
    pub fn write(&mut self) -> RwLockWriteGuard<'_, Page> {
        self.is_dirty = true;
        self.page.as_ref().expect("guard already dropped").write()
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if self.page.take().is_some() {
            self.bpm.unpin_page(self.page_id, self.is_dirty);
        }
    }
}

/// Guard holding a pin plus the frame's shared latch. The latch is released
/// before the pin on drop.
pub struct ReadPageGuard {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    // Some until dropped
    latch: Option<ArcRwLockReadGuard<RawRwLock, Page>>,
}

impl ReadPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, page: PagePtr) -> Self {
        let latch = page.read_arc();
        Self {
            bpm,
            page_id,
            latch: Some(latch),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page(&self) -> &Page {
        self.latch.as_ref().expect("guard already dropped")
    }

    pub fn data(&self) -> &[u8] {
        &self.page().data
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        if let Some(latch) = self.latch.take() {
            drop(latch);
            self.bpm.unpin_page(self.page_id, false);
        }
    }
}

/// Guard holding a pin plus the frame's exclusive latch. Taking mutable
/// access marks the page dirty; the latch is released before the pin.
pub struct WritePageGuard {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    // Some until dropped
    latch: Option<ArcRwLockWriteGuard<RawRwLock, Page>>,
    is_dirty: bool,
}

impl WritePageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, page: PagePtr) -> Self {
        let latch = page.write_arc();
        Self {
            bpm,
            page_id,
            latch: Some(latch),
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page(&self) -> &Page {
        self.latch.as_ref().expect("guard already dropped")
    }

    pub fn page_mut(&mut self) -> &mut Page {
        self.is_dirty = true;
        self.latch.as_mut().expect("guard already dropped")
    }

    pub fn data(&self) -> &[u8] {
        &self.page().data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.page_mut().data
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        if let Some(latch) = self.latch.take() {
            drop(latch);
            self.bpm.unpin_page(self.page_id, self.is_dirty);
        }
    }
}
