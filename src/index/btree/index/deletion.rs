use log::debug;
use serde::{Deserialize, Serialize};

use crate::common::types::INVALID_PAGE_ID;
use crate::index::btree::error::BTreeError;
use crate::index::btree::header::TreeHeader;
use crate::index::btree::node::BTreeNode;
use super::base::{BPlusTree, Context};

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Remove a key. Removing an absent key is a no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let mut ctx = Context::new();

        let header_guard = self.buffer_pool.fetch_page_write(self.header_page_id)?;
        let root_id = TreeHeader::root_page_id(header_guard.data());
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }
        ctx.header_page = Some(header_guard);
        ctx.root_page_id = root_id;

        self.descend_write(&mut ctx, key, false)?;
        self.delete_entry(&mut ctx, key.clone())
    }

    /// Remove `key` from the node under the context's tail latch, then
    /// restore size invariants by merging with or borrowing from a sibling,
    /// recursing into the parent when a merge removes a separator.
    fn delete_entry(&self, ctx: &mut Context, key: K) -> Result<(), BTreeError> {
        let mut guard = ctx
            .write_set
            .pop_back()
            .expect("delete must hold the target node's latch");
        let mut node = self.node_in_guard(&guard)?;

        match &mut node {
            BTreeNode::Leaf(leaf) => {
                leaf.delete_entry(&key);
            }
            BTreeNode::Internal(internal) => {
                internal.delete_entry(&key);
            }
        }

        if ctx.is_root_page(guard.page_id()) {
            if let BTreeNode::Internal(internal) = &node {
                if internal.size() == 1 {
                    // The root lost its last separator: its only child is
                    // the new root
                    let new_root = internal.value_at(0);
                    let header = ctx
                        .header_page
                        .as_mut()
                        .expect("root collapse requires the header latch");
                    TreeHeader::set_root_page_id(header.data_mut(), new_root);

                    let old_root = guard.page_id();
                    drop(guard);
                    let _ = self.buffer_pool.delete_page(old_root);
                    debug!("root collapse: page {} replaced by {}", old_root, new_root);
                    return Ok(());
                }
            }
            // A root leaf may shrink to empty; it stays the root
            return self.write_node(&mut guard, &node);
        }

        if node.size() >= self.node_min_size(&node) {
            return self.write_node(&mut guard, &node);
        }

        // Underflow: locate a sibling through the parent, preferring the
        // right one
        let mut parent = {
            let parent_guard = ctx
                .write_set
                .back()
                .expect("underflowed node must have its parent latched");
            match self.node_in_guard(parent_guard)? {
                BTreeNode::Internal(parent) => parent,
                BTreeNode::Leaf(_) => return Err(BTreeError::UnexpectedNodeKind),
            }
        };
        let index = parent
            .value_index(guard.page_id())
            .expect("latched child must appear in its parent");

        let (separator_index, sibling_pid, node_is_left) = if index + 1 < parent.size() {
            (index + 1, parent.value_at(index + 1), true)
        } else {
            (index, parent.value_at(index - 1), false)
        };
        let parent_key = parent.key_at(separator_index).clone();

        let sibling_guard = self.buffer_pool.fetch_page_write(sibling_pid)?;
        let sibling_node = self.node_in_guard(&sibling_guard)?;

        let (mut left_guard, mut left_node, mut right_guard, right_node) = if node_is_left {
            (guard, node, sibling_guard, sibling_node)
        } else {
            (sibling_guard, sibling_node, guard, node)
        };

        if left_node.size() + right_node.size() <= self.node_max_size(&left_node) {
            // Merge right into left, then drop the separator from the parent
            match (&mut left_node, right_node) {
                (BTreeNode::Leaf(left), BTreeNode::Leaf(right)) => left.append_from(right),
                (BTreeNode::Internal(left), BTreeNode::Internal(right)) => {
                    left.append_from(parent_key.clone(), right)
                }
                _ => return Err(BTreeError::UnexpectedNodeKind),
            }
            self.write_node(&mut left_guard, &left_node)?;

            let right_pid = right_guard.page_id();
            // Child latches go before recursing into the parent
            drop(left_guard);
            drop(right_guard);
            self.delete_entry(ctx, parent_key)?;
            let _ = self.buffer_pool.delete_page(right_pid);
            return Ok(());
        }

        // Borrow one entry across the sibling boundary. Ancestors above the
        // immediate parent can no longer be touched.
        while ctx.write_set.len() > 1 {
            ctx.write_set.pop_front();
            ctx.header_page = None;
        }

        let mut right_node = right_node;
        match (&mut left_node, &mut right_node) {
            (BTreeNode::Leaf(left), BTreeNode::Leaf(right)) => {
                if left.size() < self.leaf_min_size() {
                    let (key, value) = right.pop_front();
                    left.insert(key, value);
                } else {
                    let (key, value) = left.pop_back();
                    right.insert(key, value);
                }
                parent.set_key_at(separator_index, right.key_at(0).clone());
            }
            (BTreeNode::Internal(left), BTreeNode::Internal(right)) => {
                if left.size() < self.internal_min_size() {
                    // Rotate left: the parent separator descends into the
                    // left node, the right node's first key ascends
                    let (first_key, first_child) = right.pop_front();
                    left.push_back(parent_key, first_child);
                    parent.set_key_at(separator_index, first_key);
                } else {
                    let (last_key, last_child) = left.pop_back();
                    right.push_front(parent_key, last_child);
                    parent.set_key_at(separator_index, last_key);
                }
            }
            _ => return Err(BTreeError::UnexpectedNodeKind),
        }

        self.write_node(&mut left_guard, &left_node)?;
        self.write_node(&mut right_guard, &right_node)?;
        let parent_guard = ctx
            .write_set
            .back_mut()
            .expect("borrow must keep the parent latched");
        self.write_node(parent_guard, &BTreeNode::Internal(parent))
    }
}
