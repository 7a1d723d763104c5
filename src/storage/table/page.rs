use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, TxnId, INVALID_PAGE_ID, INVALID_TXN_ID, PAGE_SIZE};

// Header layout:
//   next_page_id: u32
//   tuple_count:  u32
//   free_space_offset: u32
pub const TABLE_PAGE_HEADER_SIZE: usize = 12;

// Slot entry (stored from the end of the page): offset u32, length u32
pub const SLOT_SIZE: usize = 8;

// Tuple metadata stored ahead of each tuple's bytes:
//   insert_txn_id: u32, delete_txn_id: u32, is_deleted: u8
pub const TUPLE_META_SIZE: usize = 9;

/// Visibility metadata kept with every tuple. Aborting an insert tombstones
/// the tuple; aborting a delete clears the tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleMeta {
    pub insert_txn_id: TxnId,
    pub delete_txn_id: TxnId,
    pub is_deleted: bool,
}

impl TupleMeta {
    pub fn new(insert_txn_id: TxnId) -> Self {
        Self {
            insert_txn_id,
            delete_txn_id: INVALID_TXN_ID,
            is_deleted: false,
        }
    }

    fn to_bytes(self) -> [u8; TUPLE_META_SIZE] {
        let mut bytes = [0u8; TUPLE_META_SIZE];
        LittleEndian::write_u32(&mut bytes[0..4], self.insert_txn_id);
        LittleEndian::write_u32(&mut bytes[4..8], self.delete_txn_id);
        bytes[8] = self.is_deleted as u8;
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            insert_txn_id: LittleEndian::read_u32(&bytes[0..4]),
            delete_txn_id: LittleEndian::read_u32(&bytes[4..8]),
            is_deleted: bytes[8] != 0,
        }
    }
}

/// Slotted-page codec for table pages. Tuple bytes (meta-prefixed) grow from
/// the header; the slot array grows backwards from the page tail.
pub struct TablePage;

impl TablePage {
    pub fn init(page: &mut Page) {
        LittleEndian::write_u32(&mut page.data[0..4], INVALID_PAGE_ID);
        LittleEndian::write_u32(&mut page.data[4..8], 0);
        LittleEndian::write_u32(&mut page.data[8..12], TABLE_PAGE_HEADER_SIZE as u32);
    }

    pub fn next_page_id(page: &Page) -> PageId {
        LittleEndian::read_u32(&page.data[0..4])
    }

    pub fn set_next_page_id(page: &mut Page, next: PageId) {
        LittleEndian::write_u32(&mut page.data[0..4], next);
    }

    pub fn tuple_count(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[4..8])
    }

    fn free_space_offset(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[8..12])
    }

    fn slot_position(slot: u32) -> usize {
        PAGE_SIZE - SLOT_SIZE * (slot as usize + 1)
    }

    fn slot(page: &Page, slot: u32) -> Option<(u32, u32)> {
        if slot >= Self::tuple_count(page) {
            return None;
        }
        let pos = Self::slot_position(slot);
        let offset = LittleEndian::read_u32(&page.data[pos..pos + 4]);
        let length = LittleEndian::read_u32(&page.data[pos + 4..pos + 8]);
        Some((offset, length))
    }

    /// Insert a meta-prefixed tuple, returning its slot, or None when the
    /// page lacks room for the tuple plus a new slot entry.
    pub fn insert_tuple(page: &mut Page, meta: &TupleMeta, data: &[u8]) -> Option<u32> {
        let tuple_count = Self::tuple_count(page);
        let free_offset = Self::free_space_offset(page) as usize;
        let stored_len = TUPLE_META_SIZE + data.len();

        let slot_array_start = PAGE_SIZE - SLOT_SIZE * (tuple_count as usize + 1);
        if free_offset + stored_len > slot_array_start {
            return None;
        }

        page.data[free_offset..free_offset + TUPLE_META_SIZE].copy_from_slice(&meta.to_bytes());
        page.data[free_offset + TUPLE_META_SIZE..free_offset + stored_len].copy_from_slice(data);

        let slot = tuple_count;
        let pos = Self::slot_position(slot);
        LittleEndian::write_u32(&mut page.data[pos..pos + 4], free_offset as u32);
        LittleEndian::write_u32(&mut page.data[pos + 4..pos + 8], stored_len as u32);

        LittleEndian::write_u32(&mut page.data[4..8], tuple_count + 1);
        LittleEndian::write_u32(&mut page.data[8..12], (free_offset + stored_len) as u32);
        Some(slot)
    }

    pub fn tuple_meta(page: &Page, slot: u32) -> Option<TupleMeta> {
        let (offset, _) = Self::slot(page, slot)?;
        Some(TupleMeta::from_bytes(
            &page.data[offset as usize..offset as usize + TUPLE_META_SIZE],
        ))
    }

    pub fn set_tuple_meta(page: &mut Page, slot: u32, meta: &TupleMeta) -> bool {
        let Some((offset, _)) = Self::slot(page, slot) else {
            return false;
        };
        page.data[offset as usize..offset as usize + TUPLE_META_SIZE]
            .copy_from_slice(&meta.to_bytes());
        true
    }

    pub fn get_tuple(page: &Page, slot: u32) -> Option<(TupleMeta, Vec<u8>)> {
        let (offset, length) = Self::slot(page, slot)?;
        let meta = TupleMeta::from_bytes(&page.data[offset as usize..offset as usize + TUPLE_META_SIZE]);
        let data =
            page.data[offset as usize + TUPLE_META_SIZE..(offset + length) as usize].to_vec();
        Some((meta, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get_tuple() {
        let mut page = Page::new(0);
        TablePage::init(&mut page);

        let meta = TupleMeta::new(7);
        let slot = TablePage::insert_tuple(&mut page, &meta, b"first tuple").unwrap();
        assert_eq!(slot, 0);
        let slot = TablePage::insert_tuple(&mut page, &meta, b"second").unwrap();
        assert_eq!(slot, 1);
        assert_eq!(TablePage::tuple_count(&page), 2);

        let (got_meta, data) = TablePage::get_tuple(&page, 0).unwrap();
        assert_eq!(got_meta, meta);
        assert_eq!(data, b"first tuple");

        let (_, data) = TablePage::get_tuple(&page, 1).unwrap();
        assert_eq!(data, b"second");

        assert!(TablePage::get_tuple(&page, 2).is_none());
    }

    #[test]
    fn test_set_tuple_meta_tombstones() {
        let mut page = Page::new(0);
        TablePage::init(&mut page);

        let meta = TupleMeta::new(1);
        let slot = TablePage::insert_tuple(&mut page, &meta, b"row").unwrap();

        let mut tombstone = TablePage::tuple_meta(&page, slot).unwrap();
        tombstone.is_deleted = true;
        tombstone.delete_txn_id = 9;
        assert!(TablePage::set_tuple_meta(&mut page, slot, &tombstone));

        let (read_back, data) = TablePage::get_tuple(&page, slot).unwrap();
        assert!(read_back.is_deleted);
        assert_eq!(read_back.delete_txn_id, 9);
        assert_eq!(data, b"row");
    }

    #[test]
    fn test_insert_fails_when_full() {
        let mut page = Page::new(0);
        TablePage::init(&mut page);

        let meta = TupleMeta::new(1);
        let big = vec![0u8; 1000];
        let mut inserted = 0;
        while TablePage::insert_tuple(&mut page, &meta, &big).is_some() {
            inserted += 1;
        }
        // 4096-byte page minus header: four 1009-byte tuples plus slots fit
        assert!(inserted > 0 && inserted < 5);
        assert_eq!(TablePage::tuple_count(&page), inserted);
    }

    #[test]
    fn test_next_page_link() {
        let mut page = Page::new(0);
        TablePage::init(&mut page);
        assert_eq!(TablePage::next_page_id(&page), INVALID_PAGE_ID);
        TablePage::set_next_page_id(&mut page, 17);
        assert_eq!(TablePage::next_page_id(&page), 17);
    }
}
