use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, INVALID_PAGE_ID};

/// The single header page of a tree: a little-endian `root_page_id` at
/// offset 0. All root transitions happen behind this page's write latch.
pub struct TreeHeader;

impl TreeHeader {
    pub fn init(data: &mut [u8]) {
        LittleEndian::write_u32(&mut data[0..4], INVALID_PAGE_ID);
    }

    pub fn root_page_id(data: &[u8]) -> PageId {
        LittleEndian::read_u32(&data[0..4])
    }

    pub fn set_root_page_id(data: &mut [u8], root: PageId) {
        LittleEndian::write_u32(&mut data[0..4], root);
    }
}
