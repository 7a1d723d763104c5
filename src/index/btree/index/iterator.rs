use std::marker::PhantomData;
use std::sync::Arc;
use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::header::TreeHeader;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::deserialize_node;
use crate::storage::buffer::BufferPoolManager;
use super::base::BPlusTree;

/// A single-pass, key-ordered walk of the leaf chain. Each step latches the
/// current leaf shared, yields one entry, and follows `next_page_id` when
/// the leaf is exhausted. The walk ends when the chain runs out.
pub struct BTreeIterator<K> {
    buffer_pool: Arc<BufferPoolManager>,
    page_id: PageId,
    index: usize,
    _phantom: PhantomData<K>,
}

impl<K> BTreeIterator<K> {
    fn new(buffer_pool: Arc<BufferPoolManager>, page_id: PageId, index: usize) -> Self {
        Self {
            buffer_pool,
            page_id,
            index,
            _phantom: PhantomData,
        }
    }

    fn end(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self::new(buffer_pool, INVALID_PAGE_ID, 0)
    }

    pub fn is_end(&self) -> bool {
        self.page_id == INVALID_PAGE_ID
    }
}

impl<K> Iterator for BTreeIterator<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    type Item = Result<(K, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.page_id == INVALID_PAGE_ID {
                return None;
            }

            let guard = match self.buffer_pool.fetch_page_read(self.page_id) {
                Ok(guard) => guard,
                Err(e) => {
                    self.page_id = INVALID_PAGE_ID;
                    return Some(Err(e.into()));
                }
            };
            let leaf = match deserialize_node::<K>(guard.data()) {
                Ok(BTreeNode::Leaf(leaf)) => leaf,
                Ok(BTreeNode::Internal(_)) => {
                    self.page_id = INVALID_PAGE_ID;
                    return Some(Err(BTreeError::UnexpectedNodeKind));
                }
                Err(e) => {
                    self.page_id = INVALID_PAGE_ID;
                    return Some(Err(e));
                }
            };

            if self.index < leaf.size() {
                let entry = (leaf.key_at(self.index).clone(), leaf.value_at(self.index));
                self.index += 1;
                return Some(Ok(entry));
            }

            self.page_id = leaf.next_leaf.unwrap_or(INVALID_PAGE_ID);
            self.index = 0;
        }
    }
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Iterate from the leftmost leaf.
    pub fn iter(&self) -> Result<BTreeIterator<K>, BTreeError> {
        let header_guard = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let root_id = TreeHeader::root_page_id(header_guard.data());
        if root_id == INVALID_PAGE_ID {
            return Ok(BTreeIterator::end(self.buffer_pool.clone()));
        }

        let mut guard = self.buffer_pool.fetch_page_read(root_id)?;
        drop(header_guard);
        let mut node = deserialize_node::<K>(guard.data())?;

        while let BTreeNode::Internal(internal) = node {
            guard = self.buffer_pool.fetch_page_read(internal.value_at(0))?;
            node = deserialize_node::<K>(guard.data())?;
        }

        Ok(BTreeIterator::new(
            self.buffer_pool.clone(),
            guard.page_id(),
            0,
        ))
    }

    /// Iterate from the first entry whose key is `>= key`.
    pub fn iter_from(&self, key: &K) -> Result<BTreeIterator<K>, BTreeError> {
        let header_guard = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let root_id = TreeHeader::root_page_id(header_guard.data());
        if root_id == INVALID_PAGE_ID {
            return Ok(BTreeIterator::end(self.buffer_pool.clone()));
        }

        let mut guard = self.buffer_pool.fetch_page_read(root_id)?;
        drop(header_guard);
        let mut node = deserialize_node::<K>(guard.data())?;

        loop {
            match node {
                BTreeNode::Leaf(leaf) => {
                    let (_, index) = leaf.find(key);
                    return Ok(BTreeIterator::new(
                        self.buffer_pool.clone(),
                        guard.page_id(),
                        index,
                    ));
                }
                BTreeNode::Internal(internal) => {
                    guard = self.buffer_pool.fetch_page_read(internal.find(key))?;
                    node = deserialize_node::<K>(guard.data())?;
                }
            }
        }
    }
}
