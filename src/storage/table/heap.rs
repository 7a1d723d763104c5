use std::sync::Arc;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::table::page::{TablePage, TupleMeta};

#[derive(Error, Debug)]
pub enum TableHeapError {
    #[error("tuple of {0} bytes does not fit in an empty page")]
    TupleTooLarge(usize),

    #[error("no tuple at rid {0}")]
    TupleNotFound(Rid),

    #[error("buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}

/// A table heap: a forward-linked chain of slotted pages. Tuples are
/// addressed by `Rid` and carry visibility metadata; deletion is a tombstone
/// flip, never physical removal.
pub struct TableHeap {
    buffer_pool: Arc<BufferPoolManager>,
    first_page_id: PageId,
    last_page_id: Mutex<PageId>,
}

impl TableHeap {
    /// Create an empty heap with a single initialized page.
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Result<Self, TableHeapError> {
        let (mut guard, first_page_id) = buffer_pool.new_page_guarded()?;
        TablePage::init(&mut guard.write());
        drop(guard);

        Ok(Self {
            buffer_pool,
            first_page_id,
            last_page_id: Mutex::new(first_page_id),
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Append a tuple, growing the chain by one page when the tail is full.
    pub fn insert_tuple(&self, meta: TupleMeta, data: &[u8]) -> Result<Rid, TableHeapError> {
        let mut last_page_id = self.last_page_id.lock();

        let mut guard = self.buffer_pool.fetch_page_write(*last_page_id)?;
        if let Some(slot) = TablePage::insert_tuple(guard.page_mut(), &meta, data) {
            return Ok(Rid::new(*last_page_id, slot));
        }

        // Tail is full: chain a fresh page and retry there
        let (new_page, new_page_id) = self.buffer_pool.new_page()?;
        {
            let mut page = new_page.write();
            TablePage::init(&mut page);
        }
        TablePage::set_next_page_id(guard.page_mut(), new_page_id);
        drop(guard);

        let slot = {
            let mut page = new_page.write();
            TablePage::insert_tuple(&mut page, &meta, data)
        };
        self.buffer_pool.unpin_page(new_page_id, true);

        match slot {
            Some(slot) => {
                *last_page_id = new_page_id;
                Ok(Rid::new(new_page_id, slot))
            }
            None => Err(TableHeapError::TupleTooLarge(data.len())),
        }
    }

    pub fn tuple_meta(&self, rid: Rid) -> Result<TupleMeta, TableHeapError> {
        let guard = self.buffer_pool.fetch_page_read(rid.page_id)?;
        TablePage::tuple_meta(guard.page(), rid.slot).ok_or(TableHeapError::TupleNotFound(rid))
    }

    /// Rewrite a tuple's metadata in place; the abort path's tombstone flip.
    pub fn update_tuple_meta(&self, meta: TupleMeta, rid: Rid) -> Result<(), TableHeapError> {
        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        if TablePage::set_tuple_meta(guard.page_mut(), rid.slot, &meta) {
            Ok(())
        } else {
            Err(TableHeapError::TupleNotFound(rid))
        }
    }

    pub fn get_tuple(&self, rid: Rid) -> Result<(TupleMeta, Vec<u8>), TableHeapError> {
        let guard = self.buffer_pool.fetch_page_read(rid.page_id)?;
        TablePage::get_tuple(guard.page(), rid.slot).ok_or(TableHeapError::TupleNotFound(rid))
    }

    /// Sequential scan over live (non-tombstoned) tuples in physical order.
    pub fn iter(&self) -> TableIterator<'_> {
        TableIterator {
            heap: self,
            page_id: self.first_page_id,
            slot: 0,
        }
    }
}

/// Pull-based sequential scan: a finite, non-restartable pass over the heap.
pub struct TableIterator<'a> {
    heap: &'a TableHeap,
    page_id: PageId,
    slot: u32,
}

impl Iterator for TableIterator<'_> {
    type Item = Result<(Rid, TupleMeta, Vec<u8>), TableHeapError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.page_id == INVALID_PAGE_ID {
                return None;
            }

            let guard = match self.heap.buffer_pool.fetch_page_read(self.page_id) {
                Ok(guard) => guard,
                Err(e) => return Some(Err(e.into())),
            };

            if self.slot >= TablePage::tuple_count(guard.page()) {
                self.page_id = TablePage::next_page_id(guard.page());
                self.slot = 0;
                continue;
            }

            let rid = Rid::new(self.page_id, self.slot);
            self.slot += 1;

            // Skip tombstones
            if let Some((meta, data)) = TablePage::get_tuple(guard.page(), rid.slot) {
                if !meta.is_deleted {
                    return Some(Ok((rid, meta, data)));
                }
            }
        }
    }
}
