use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode};

// Header layout:
//   tag:          u8  (1 = leaf, 2 = internal)
//   size:         u16 (leaf: entries, internal: child pointers)
//   next_page_id: u32 (leaf chain; INVALID for internal nodes)
//   values_off:   u16 (offset of the value/child region)
// Keys follow as (u16 length, bincode bytes) records.
const NODE_HEADER_SIZE: usize = 9;

const TAG_LEAF: u8 = 1;
const TAG_INTERNAL: u8 = 2;

/// Serialize a node into a page-sized buffer.
pub fn serialize_node<K>(node: &BTreeNode<K>, data: &mut [u8]) -> Result<(), BTreeError>
where
    K: Serialize + Clone + Ord,
{
    data.fill(0);

    let (tag, size, next_page_id) = match node {
        BTreeNode::Leaf(leaf) => (
            TAG_LEAF,
            leaf.size(),
            leaf.next_leaf.unwrap_or(INVALID_PAGE_ID),
        ),
        BTreeNode::Internal(internal) => (TAG_INTERNAL, internal.size(), INVALID_PAGE_ID),
    };

    data[0] = tag;
    LittleEndian::write_u16(&mut data[1..3], size as u16);
    LittleEndian::write_u32(&mut data[3..7], next_page_id);

    let keys: &[K] = match node {
        BTreeNode::Leaf(leaf) => &leaf.keys,
        BTreeNode::Internal(internal) => &internal.keys,
    };

    let mut offset = NODE_HEADER_SIZE;
    for key in keys {
        let key_bytes = bincode::serialize(key)
            .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
        if offset + 2 + key_bytes.len() > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge);
        }
        LittleEndian::write_u16(&mut data[offset..offset + 2], key_bytes.len() as u16);
        offset += 2;
        data[offset..offset + key_bytes.len()].copy_from_slice(&key_bytes);
        offset += key_bytes.len();
    }

    LittleEndian::write_u16(&mut data[7..9], offset as u16);

    match node {
        BTreeNode::Leaf(leaf) => {
            for value in &leaf.values {
                if offset + 8 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_u32(&mut data[offset..offset + 4], value.page_id);
                LittleEndian::write_u32(&mut data[offset + 4..offset + 8], value.slot);
                offset += 8;
            }
        }
        BTreeNode::Internal(internal) => {
            for child in &internal.children {
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_u32(&mut data[offset..offset + 4], *child);
                offset += 4;
            }
        }
    }

    Ok(())
}

/// Deserialize a node from a page-sized buffer.
pub fn deserialize_node<K>(data: &[u8]) -> Result<BTreeNode<K>, BTreeError>
where
    K: for<'de> Deserialize<'de> + Clone + Ord,
{
    let tag = data[0];
    let size = LittleEndian::read_u16(&data[1..3]) as usize;
    let next_page_id = LittleEndian::read_u32(&data[3..7]);
    let values_offset = LittleEndian::read_u16(&data[7..9]) as usize;

    let key_count = match tag {
        TAG_LEAF => size,
        TAG_INTERNAL => size.saturating_sub(1),
        _ => {
            return Err(BTreeError::DeserializationError(format!(
                "unknown node tag {tag}"
            )))
        }
    };

    let mut offset = NODE_HEADER_SIZE;
    let mut keys = Vec::with_capacity(key_count);
    for _ in 0..key_count {
        let key_len = LittleEndian::read_u16(&data[offset..offset + 2]) as usize;
        offset += 2;
        let key = bincode::deserialize(&data[offset..offset + key_len])
            .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
        keys.push(key);
        offset += key_len;
    }

    offset = values_offset;
    match tag {
        TAG_LEAF => {
            let mut values = Vec::with_capacity(size);
            for _ in 0..size {
                let page_id = LittleEndian::read_u32(&data[offset..offset + 4]);
                let slot = LittleEndian::read_u32(&data[offset + 4..offset + 8]);
                values.push(Rid::new(page_id, slot));
                offset += 8;
            }
            Ok(BTreeNode::Leaf(LeafNode {
                keys,
                values,
                next_leaf: if next_page_id == INVALID_PAGE_ID {
                    None
                } else {
                    Some(next_page_id)
                },
            }))
        }
        TAG_INTERNAL => {
            let mut children: Vec<PageId> = Vec::with_capacity(size);
            for _ in 0..size {
                children.push(LittleEndian::read_u32(&data[offset..offset + 4]));
                offset += 4;
            }
            Ok(BTreeNode::Internal(InternalNode { keys, children }))
        }
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_round_trip() {
        let mut leaf = LeafNode::new();
        leaf.insert(5i64, Rid::new(1, 10));
        leaf.insert(9i64, Rid::new(2, 20));
        leaf.next_leaf = Some(77);

        let mut data = vec![0u8; PAGE_SIZE];
        serialize_node(&BTreeNode::Leaf(leaf), &mut data).unwrap();

        match deserialize_node::<i64>(&data).unwrap() {
            BTreeNode::Leaf(read_back) => {
                assert_eq!(read_back.keys, vec![5, 9]);
                assert_eq!(read_back.values, vec![Rid::new(1, 10), Rid::new(2, 20)]);
                assert_eq!(read_back.next_leaf, Some(77));
            }
            BTreeNode::Internal(_) => panic!("expected leaf"),
        }
    }

    #[test]
    fn test_internal_round_trip() {
        let node = InternalNode {
            keys: vec![10i64, 20],
            children: vec![100, 101, 102],
        };

        let mut data = vec![0u8; PAGE_SIZE];
        serialize_node(&BTreeNode::Internal(node), &mut data).unwrap();

        match deserialize_node::<i64>(&data).unwrap() {
            BTreeNode::Internal(read_back) => {
                assert_eq!(read_back.keys, vec![10, 20]);
                assert_eq!(read_back.children, vec![100, 101, 102]);
            }
            BTreeNode::Leaf(_) => panic!("expected internal"),
        }
    }

    #[test]
    fn test_empty_leaf_round_trip() {
        let leaf: LeafNode<i64> = LeafNode::new();
        let mut data = vec![0u8; PAGE_SIZE];
        serialize_node(&BTreeNode::Leaf(leaf), &mut data).unwrap();

        match deserialize_node::<i64>(&data).unwrap() {
            BTreeNode::Leaf(read_back) => {
                assert!(read_back.keys.is_empty());
                assert_eq!(read_back.next_leaf, None);
            }
            BTreeNode::Internal(_) => panic!("expected leaf"),
        }
    }

    #[test]
    fn test_string_keys_round_trip() {
        let mut leaf = LeafNode::new();
        leaf.insert("apple".to_string(), Rid::new(0, 1));
        leaf.insert("banana".to_string(), Rid::new(0, 2));

        let mut data = vec![0u8; PAGE_SIZE];
        serialize_node(&BTreeNode::Leaf(leaf), &mut data).unwrap();

        match deserialize_node::<String>(&data).unwrap() {
            BTreeNode::Leaf(read_back) => {
                assert_eq!(read_back.keys, vec!["apple", "banana"]);
            }
            BTreeNode::Internal(_) => panic!("expected leaf"),
        }
    }

    #[test]
    fn test_uninitialized_page_is_rejected() {
        let data = vec![0u8; PAGE_SIZE];
        assert!(deserialize_node::<i64>(&data).is_err());
    }
}
