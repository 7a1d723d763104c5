use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::header::TreeHeader;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{deserialize_node, serialize_node};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::WritePageGuard;

/// A concurrent B+tree index over the buffer pool. Keys are unique; values
/// are record ids. Writers crab exclusive latches from the header down,
/// releasing ancestors as soon as a child cannot overflow (insert) or
/// underflow (delete); readers crab shared latches.
pub struct BPlusTree<K> {
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) header_page_id: PageId,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    pub(crate) _phantom: PhantomData<K>,
}

/// The latch context carried through a structural write: the header guard
/// (released once the root cannot change) and the root-to-leaf chain of
/// exclusive latches still held.
pub(crate) struct Context {
    pub header_page: Option<WritePageGuard>,
    pub write_set: VecDeque<WritePageGuard>,
    pub root_page_id: PageId,
}

impl Context {
    pub fn new() -> Self {
        Self {
            header_page: None,
            write_set: VecDeque::new(),
            root_page_id: INVALID_PAGE_ID,
        }
    }

    pub fn is_root_page(&self, page_id: PageId) -> bool {
        page_id == self.root_page_id
    }

    /// Release every latch held so far; the subtree below is on its own.
    pub fn release_all(&mut self) {
        self.header_page = None;
        self.write_set.clear();
    }
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Create an empty tree, allocating its header page. `leaf_max_size`
    /// and `internal_max_size` bound entries per leaf and pointers per
    /// internal node.
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 2, "leaf nodes need room for a split");
        assert!(internal_max_size >= 3, "internal nodes need room for a split");

        let (page, header_page_id) = buffer_pool.new_page()?;
        {
            let mut page = page.write();
            TreeHeader::init(&mut page.data);
        }
        buffer_pool.unpin_page(header_page_id, true);

        Ok(Self {
            buffer_pool,
            header_page_id,
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub(crate) fn leaf_min_size(&self) -> usize {
        self.leaf_max_size / 2
    }

    pub(crate) fn internal_min_size(&self) -> usize {
        (self.internal_max_size + 1) / 2
    }

    pub(crate) fn node_max_size(&self, node: &BTreeNode<K>) -> usize {
        match node {
            BTreeNode::Leaf(_) => self.leaf_max_size,
            BTreeNode::Internal(_) => self.internal_max_size,
        }
    }

    pub(crate) fn node_min_size(&self, node: &BTreeNode<K>) -> usize {
        match node {
            BTreeNode::Leaf(_) => self.leaf_min_size(),
            BTreeNode::Internal(_) => self.internal_min_size(),
        }
    }

    /// Current root page id, read under the header's shared latch.
    pub fn root_page_id(&self) -> Result<PageId, BTreeError> {
        let guard = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        Ok(TreeHeader::root_page_id(guard.data()))
    }

    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        Ok(self.root_page_id()? == INVALID_PAGE_ID)
    }

    /// Point lookup. Shared latches crab down: the child's latch is taken
    /// before the parent's is dropped.
    pub fn get_value(&self, key: &K) -> Result<Vec<Rid>, BTreeError> {
        let header_guard = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let root_id = TreeHeader::root_page_id(header_guard.data());
        if root_id == INVALID_PAGE_ID {
            return Ok(Vec::new());
        }

        let mut guard = self.buffer_pool.fetch_page_read(root_id)?;
        drop(header_guard);
        let mut node = deserialize_node::<K>(guard.data())?;

        loop {
            match node {
                BTreeNode::Leaf(leaf) => {
                    let (found, index) = leaf.find(key);
                    return Ok(if found {
                        vec![leaf.value_at(index)]
                    } else {
                        Vec::new()
                    });
                }
                BTreeNode::Internal(internal) => {
                    // Assignment order is the crab: the child latch is
                    // acquired by the right-hand side before the parent
                    // guard is dropped by the assignment.
                    guard = self.buffer_pool.fetch_page_read(internal.find(key))?;
                    node = deserialize_node::<K>(guard.data())?;
                }
            }
        }
    }

    /// Write-crab from the current root to the leaf covering `key`, pushing
    /// every still-needed exclusive latch onto the context. Ancestors (and
    /// the header) are released as soon as a child is safe.
    pub(crate) fn descend_write(
        &self,
        ctx: &mut Context,
        key: &K,
        for_insert: bool,
    ) -> Result<(), BTreeError> {
        let guard = self.buffer_pool.fetch_page_write(ctx.root_page_id)?;
        let mut node = deserialize_node::<K>(guard.data())?;
        ctx.write_set.push_back(guard);

        loop {
            let internal = match node {
                BTreeNode::Leaf(_) => return Ok(()),
                BTreeNode::Internal(internal) => internal,
            };

            let child_guard = self.buffer_pool.fetch_page_write(internal.find(key))?;
            let child_node = deserialize_node::<K>(child_guard.data())?;

            let safe = if for_insert {
                child_node.size() < self.node_max_size(&child_node)
            } else {
                child_node.size() > self.node_min_size(&child_node)
            };
            if safe {
                ctx.release_all();
            }
            ctx.write_set.push_back(child_guard);
            node = child_node;
        }
    }

    /// Re-read the node under a guard already held by the context.
    pub(crate) fn node_in_guard(&self, guard: &WritePageGuard) -> Result<BTreeNode<K>, BTreeError> {
        deserialize_node::<K>(guard.data())
    }

    /// Write a node back through a held guard.
    pub(crate) fn write_node(
        &self,
        guard: &mut WritePageGuard,
        node: &BTreeNode<K>,
    ) -> Result<(), BTreeError> {
        serialize_node(node, guard.data_mut())
    }
}
