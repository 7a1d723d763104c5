use log::debug;
use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::header::TreeHeader;
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode};
use crate::index::btree::serialization::serialize_node;
use super::base::{BPlusTree, Context};

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Insert a key/value pair. Returns false (tree untouched) when the key
    /// is already present.
    pub fn insert(&self, key: K, value: Rid) -> Result<bool, BTreeError> {
        let mut ctx = Context::new();

        let header_guard = self.buffer_pool.fetch_page_write(self.header_page_id)?;
        let root_id = TreeHeader::root_page_id(header_guard.data());
        ctx.header_page = Some(header_guard);

        // Empty tree: the first leaf becomes the root
        if root_id == INVALID_PAGE_ID {
            let (page, root_pid) = self.buffer_pool.new_page()?;
            let mut leaf = LeafNode::new();
            leaf.insert(key, value);
            {
                let mut page = page.write();
                serialize_node(&BTreeNode::Leaf(leaf), &mut page.data)?;
            }
            self.buffer_pool.unpin_page(root_pid, true);

            let header = ctx.header_page.as_mut().expect("header latch must be held");
            TreeHeader::set_root_page_id(header.data_mut(), root_pid);
            return Ok(true);
        }

        ctx.root_page_id = root_id;
        self.descend_write(&mut ctx, &key, true)?;

        let leaf_guard = ctx.write_set.back().expect("descent must latch the leaf");
        let mut leaf = match self.node_in_guard(leaf_guard)? {
            BTreeNode::Leaf(leaf) => leaf,
            BTreeNode::Internal(_) => return Err(BTreeError::UnexpectedNodeKind),
        };

        if leaf.size() < self.leaf_max_size {
            let inserted = leaf.insert(key, value);
            if inserted {
                let guard = ctx.write_set.back_mut().expect("leaf latch must be held");
                self.write_node(guard, &BTreeNode::Leaf(leaf))?;
            }
            return Ok(inserted);
        }

        // Full leaf: materialize the sorted array with the new entry
        let mut array = leaf.get_array();
        let position = match array.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(_) => return Ok(false),
            Err(i) => i,
        };
        array.insert(position, (key, value));

        let (sibling_page, sibling_pid) = self.buffer_pool.new_page()?;

        let left_size = self.leaf_max_size / 2 + 1;
        let mut right = LeafNode::new();
        right.set_array(&array[left_size..]);
        right.next_leaf = leaf.next_leaf;
        leaf.set_array(&array[..left_size]);
        leaf.next_leaf = Some(sibling_pid);
        let separator = right.key_at(0).clone();

        {
            let mut page = sibling_page.write();
            serialize_node(&BTreeNode::Leaf(right), &mut page.data)?;
        }
        self.buffer_pool.unpin_page(sibling_pid, true);

        {
            let guard = ctx.write_set.back_mut().expect("leaf latch must be held");
            self.write_node(guard, &BTreeNode::Leaf(leaf))?;
        }

        self.insert_in_parent(&mut ctx, separator, sibling_pid)?;
        Ok(true)
    }

    /// Splice a freshly split-off right sibling into the parent, splitting
    /// upward as long as parents overflow. The context's tail guard covers
    /// the left half of the split just performed.
    fn insert_in_parent(
        &self,
        ctx: &mut Context,
        key: K,
        right_child: PageId,
    ) -> Result<(), BTreeError> {
        let left_guard = ctx
            .write_set
            .pop_back()
            .expect("split must hold the overflowed node's latch");
        let left_pid = left_guard.page_id();

        if ctx.is_root_page(left_pid) {
            // The old root split: grow the tree by one level
            let (page, new_root_pid) = self.buffer_pool.new_page()?;
            let new_root = InternalNode::new_root(key, left_pid, right_child);
            {
                let mut page = page.write();
                serialize_node(&BTreeNode::Internal(new_root), &mut page.data)?;
            }
            self.buffer_pool.unpin_page(new_root_pid, true);

            let header = ctx
                .header_page
                .as_mut()
                .expect("root split requires the header latch");
            TreeHeader::set_root_page_id(header.data_mut(), new_root_pid);
            ctx.root_page_id = new_root_pid;
            debug!("root split: new root page {}", new_root_pid);
            return Ok(());
        }
        drop(left_guard);

        let parent_guard = ctx.write_set.back().expect("non-root split needs its parent latched");
        let mut parent = match self.node_in_guard(parent_guard)? {
            BTreeNode::Internal(parent) => parent,
            BTreeNode::Leaf(_) => return Err(BTreeError::UnexpectedNodeKind),
        };

        if parent.size() < self.internal_max_size {
            parent.insert(key, right_child);
            let guard = ctx.write_set.back_mut().expect("parent latch must be held");
            self.write_node(guard, &BTreeNode::Internal(parent))?;
            return Ok(());
        }

        // Parent overflows too: split it and recurse with the promoted key
        parent.insert(key, right_child);
        let left_size = self.internal_max_size / 2 + 1;
        let (separator, right_node) = parent.split_off(left_size);

        let (sibling_page, sibling_pid) = self.buffer_pool.new_page()?;
        {
            let mut page = sibling_page.write();
            serialize_node(&BTreeNode::Internal(right_node), &mut page.data)?;
        }
        self.buffer_pool.unpin_page(sibling_pid, true);

        {
            let guard = ctx.write_set.back_mut().expect("parent latch must be held");
            self.write_node(guard, &BTreeNode::Internal(parent))?;
        }

        self.insert_in_parent(ctx, separator, sibling_pid)
    }
}
