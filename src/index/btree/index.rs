use std::sync::Arc;
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use log::debug;

use crate::common::config::DbConfig;
use crate::common::types::{PageId, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::index::btree::error::BTreeError;
use crate::index::btree::iterator::BTreeIterator;
use crate::index::btree::page::{BTreeNode, InternalNode, LeafNode};

/// B+Tree index over (i64 key, RID) pairs, backed by the buffer pool.
///
/// The root page id is persisted in the header page (page 0), so a tree can
/// be reopened against an existing file. A single tree-wide mutex serializes
/// operations; frame-level safety comes from the buffer pool.
pub struct BPlusTree {
    buffer_pool: Arc<BufferPoolManager>,
    leaf_max_size: usize,
    internal_max_size: usize,
    root_page_id: Mutex<PageId>,
    latch: Mutex<()>,
}

impl BPlusTree {
    /// Open the tree stored in this pool's file, or start an empty one.
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        let root_page_id = Self::load_root_pointer(&buffer_pool)?;
        Ok(Self {
            buffer_pool,
            leaf_max_size,
            internal_max_size,
            root_page_id: Mutex::new(root_page_id),
            latch: Mutex::new(()),
        })
    }

    pub fn with_config(
        buffer_pool: Arc<BufferPoolManager>,
        config: &DbConfig,
    ) -> Result<Self, BTreeError> {
        Self::new(buffer_pool, config.leaf_max_size, config.internal_max_size)
    }

    pub fn is_empty(&self) -> bool {
        self.root() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        self.root()
    }

    /// Point lookup
    pub fn get_value(&self, key: i64) -> Result<Option<Rid>, BTreeError> {
        let _guard = self.latch.lock();
        if self.is_empty() {
            return Ok(None);
        }
        let leaf_pid = self.find_leaf_page(key)?;
        let leaf = self.read_leaf(leaf_pid)?;
        Ok(leaf.lookup(key))
    }

    /// Insert a key/RID pair. Duplicate keys are rejected (returns false).
    pub fn insert(&self, key: i64, rid: Rid) -> Result<bool, BTreeError> {
        let _guard = self.latch.lock();

        if self.is_empty() {
            let page_id = self.allocate_node_page()?;
            let mut root = LeafNode::new(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            root.insert(key, rid);
            self.write_leaf(&root)?;
            self.set_root(page_id)?;
            return Ok(true);
        }

        let leaf_pid = self.find_leaf_page(key)?;
        let mut leaf = self.read_leaf(leaf_pid)?;
        if leaf.lookup(key).is_some() {
            return Ok(false);
        }
        leaf.insert(key, rid);
        if leaf.keys.len() < leaf.max_size {
            self.write_leaf(&leaf)?;
            return Ok(true);
        }

        // Leaf reached max_size: split and propagate the right half's first key.
        let new_pid = self.allocate_node_page()?;
        let right = leaf.split(new_pid);
        let risen_key = right.keys[0];
        debug!("split leaf {} -> {} at key {}", leaf_pid, new_pid, risen_key);
        let parent_id = leaf.parent_id;
        self.write_leaf(&leaf)?;
        self.write_leaf(&right)?;
        self.insert_into_parent(leaf_pid, risen_key, new_pid, parent_id)?;
        Ok(true)
    }

    /// Remove a key. Removing an absent key is a no-op.
    pub fn remove(&self, key: i64) -> Result<(), BTreeError> {
        let _guard = self.latch.lock();
        if self.is_empty() {
            return Ok(());
        }

        let leaf_pid = self.find_leaf_page(key)?;
        let mut leaf = self.read_leaf(leaf_pid)?;
        if !leaf.remove(key) {
            return Ok(());
        }
        self.write_leaf(&leaf)?;
        self.rebalance_leaf(leaf)
    }

    /// Iterate from the leftmost entry
    pub fn iter(&self) -> Result<BTreeIterator, BTreeError> {
        let _guard = self.latch.lock();
        if self.is_empty() {
            return Ok(BTreeIterator::empty(self.buffer_pool.clone()));
        }
        let mut page_id = self.root();
        loop {
            match self.read_node(page_id)? {
                BTreeNode::Leaf(leaf) => {
                    return Ok(BTreeIterator::new(self.buffer_pool.clone(), leaf, 0));
                }
                BTreeNode::Internal(node) => page_id = node.children[0],
            }
        }
    }

    /// Iterate from the first entry with key >= `key`
    pub fn iter_from(&self, key: i64) -> Result<BTreeIterator, BTreeError> {
        let _guard = self.latch.lock();
        if self.is_empty() {
            return Ok(BTreeIterator::empty(self.buffer_pool.clone()));
        }
        let leaf_pid = self.find_leaf_page(key)?;
        let leaf = self.read_leaf(leaf_pid)?;
        let index = leaf.lower_bound(key);
        Ok(BTreeIterator::new(self.buffer_pool.clone(), leaf, index))
    }

    fn root(&self) -> PageId {
        *self.root_page_id.lock()
    }

    /// Record a new root both in memory and in the header page
    fn set_root(&self, page_id: PageId) -> Result<(), BTreeError> {
        *self.root_page_id.lock() = page_id;
        let page = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut guard = page.write();
            LittleEndian::write_i32(&mut guard.data[0..4], page_id);
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true);
        Ok(())
    }

    fn load_root_pointer(buffer_pool: &BufferPoolManager) -> Result<PageId, BTreeError> {
        let page = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let stored = {
            let guard = page.read();
            LittleEndian::read_i32(&guard.data[0..4])
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, false);
        // A zeroed header page means the file has never held a tree.
        Ok(if stored <= 0 { INVALID_PAGE_ID } else { stored })
    }

    /// Allocate a page for a new node, translating pool exhaustion into the
    /// index-level out-of-memory failure.
    fn allocate_node_page(&self) -> Result<PageId, BTreeError> {
        match self.buffer_pool.new_page() {
            Ok((page_id, _)) => {
                self.buffer_pool.unpin_page(page_id, false);
                Ok(page_id)
            }
            Err(BufferPoolError::BufferExhausted) => Err(BTreeError::OutOfMemory),
            Err(e) => Err(e.into()),
        }
    }

    fn read_node(&self, page_id: PageId) -> Result<BTreeNode, BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let node = {
            let guard = page.read();
            BTreeNode::load(&guard)
        };
        self.buffer_pool.unpin_page(page_id, false);
        node
    }

    fn read_leaf(&self, page_id: PageId) -> Result<LeafNode, BTreeError> {
        match self.read_node(page_id)? {
            BTreeNode::Leaf(leaf) => Ok(leaf),
            BTreeNode::Internal(_) => Err(BTreeError::Corrupted("expected a leaf node")),
        }
    }

    fn read_internal(&self, page_id: PageId) -> Result<InternalNode, BTreeError> {
        match self.read_node(page_id)? {
            BTreeNode::Internal(node) => Ok(node),
            BTreeNode::Leaf(_) => Err(BTreeError::Corrupted("expected an internal node")),
        }
    }

    fn write_leaf(&self, leaf: &LeafNode) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(leaf.page_id)?;
        {
            let mut guard = page.write();
            leaf.store(&mut guard);
        }
        self.buffer_pool.unpin_page(leaf.page_id, true);
        Ok(())
    }

    fn write_internal(&self, node: &InternalNode) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(node.page_id)?;
        {
            let mut guard = page.write();
            node.store(&mut guard);
        }
        self.buffer_pool.unpin_page(node.page_id, true);
        Ok(())
    }

    /// Rewrite one node's parent pointer in place
    fn set_parent(&self, page_id: PageId, parent_id: PageId) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let result = {
            let mut guard = page.write();
            BTreeNode::load(&guard).map(|mut node| {
                node.set_parent_id(parent_id);
                node.store(&mut guard);
            })
        };
        self.buffer_pool.unpin_page(page_id, result.is_ok());
        result
    }

    /// Descend from the root to the leaf responsible for `key`
    fn find_leaf_page(&self, key: i64) -> Result<PageId, BTreeError> {
        let mut page_id = self.root();
        loop {
            match self.read_node(page_id)? {
                BTreeNode::Leaf(_) => return Ok(page_id),
                BTreeNode::Internal(node) => page_id = node.lookup(key),
            }
        }
    }

    /// Hook a freshly split-off right node into the parent of `left_pid`,
    /// growing a new root or splitting the parent as needed.
    fn insert_into_parent(
        &self,
        left_pid: PageId,
        key: i64,
        right_pid: PageId,
        parent_id: PageId,
    ) -> Result<(), BTreeError> {
        if parent_id == INVALID_PAGE_ID {
            // The split node was the root: grow the tree by one level.
            let root_pid = self.allocate_node_page()?;
            let mut root = InternalNode::new(root_pid, INVALID_PAGE_ID, self.internal_max_size);
            root.populate_new_root(left_pid, key, right_pid);
            self.write_internal(&root)?;
            self.set_parent(left_pid, root_pid)?;
            self.set_parent(right_pid, root_pid)?;
            self.set_root(root_pid)?;
            return Ok(());
        }

        let mut parent = self.read_internal(parent_id)?;
        parent.insert_after(left_pid, key, right_pid)?;
        if parent.children.len() <= parent.max_size {
            self.write_internal(&parent)?;
            return Ok(());
        }

        // Parent overflowed past max_size: split it and keep propagating.
        let new_pid = self.allocate_node_page()?;
        let (right_node, separator) = parent.split(new_pid);
        debug!(
            "split internal {} -> {} at separator {}",
            parent_id, new_pid, separator
        );
        for &child in &right_node.children {
            self.set_parent(child, new_pid)?;
        }
        let grandparent_id = parent.parent_id;
        self.write_internal(&parent)?;
        self.write_internal(&right_node)?;
        self.insert_into_parent(parent_id, separator, new_pid, grandparent_id)
    }

    /// Post-deletion fixup for a leaf: steal from a sibling if one can spare
    /// an entry, otherwise merge and recurse into the parent.
    fn rebalance_leaf(&self, mut leaf: LeafNode) -> Result<(), BTreeError> {
        if leaf.page_id == self.root() {
            return self.adjust_root(BTreeNode::Leaf(leaf));
        }
        if leaf.keys.len() >= leaf.min_size() {
            return Ok(());
        }

        let mut parent = self.read_internal(leaf.parent_id)?;
        let idx = parent
            .value_index(leaf.page_id)
            .ok_or(BTreeError::Corrupted("leaf missing from its parent"))?;

        // Redistribute: steal the left sibling's last entry.
        if idx > 0 {
            let left_pid = parent.children[idx - 1];
            let mut left = self.read_leaf(left_pid)?;
            if left.keys.len() > left.min_size() {
                let key = left.keys.pop().expect("donor leaf is not empty");
                let value = left.values.pop().expect("donor leaf is not empty");
                leaf.keys.insert(0, key);
                leaf.values.insert(0, value);
                parent.keys[idx] = leaf.keys[0];
                self.write_leaf(&left)?;
                self.write_leaf(&leaf)?;
                self.write_internal(&parent)?;
                return Ok(());
            }
        }

        // Redistribute: steal the right sibling's first entry.
        if idx + 1 < parent.children.len() {
            let right_pid = parent.children[idx + 1];
            let mut right = self.read_leaf(right_pid)?;
            if right.keys.len() > right.min_size() {
                let key = right.keys.remove(0);
                let value = right.values.remove(0);
                leaf.keys.push(key);
                leaf.values.push(value);
                parent.keys[idx + 1] = right.keys[0];
                self.write_leaf(&right)?;
                self.write_leaf(&leaf)?;
                self.write_internal(&parent)?;
                return Ok(());
            }
        }

        // No sibling can spare an entry: coalesce.
        if idx > 0 {
            let left_pid = parent.children[idx - 1];
            let mut left = self.read_leaf(left_pid)?;
            left.keys.append(&mut leaf.keys);
            left.values.append(&mut leaf.values);
            left.next_page_id = leaf.next_page_id;
            parent.keys.remove(idx);
            parent.children.remove(idx);
            debug!("coalesced leaf {} into {}", leaf.page_id, left_pid);
            self.write_leaf(&left)?;
            self.write_internal(&parent)?;
            self.buffer_pool.delete_page(leaf.page_id)?;
        } else {
            let right_pid = parent.children[idx + 1];
            let mut right = self.read_leaf(right_pid)?;
            leaf.keys.append(&mut right.keys);
            leaf.values.append(&mut right.values);
            leaf.next_page_id = right.next_page_id;
            parent.keys.remove(idx + 1);
            parent.children.remove(idx + 1);
            debug!("coalesced leaf {} into {}", right_pid, leaf.page_id);
            self.write_leaf(&leaf)?;
            self.write_internal(&parent)?;
            self.buffer_pool.delete_page(right_pid)?;
        }
        self.rebalance_internal(parent)
    }

    /// Same fixup one level up, where entries are (separator, child) pairs
    /// and moved children need their parent pointers rewritten.
    fn rebalance_internal(&self, mut node: InternalNode) -> Result<(), BTreeError> {
        if node.page_id == self.root() {
            return self.adjust_root(BTreeNode::Internal(node));
        }
        if node.children.len() >= node.min_size() {
            return Ok(());
        }

        let mut parent = self.read_internal(node.parent_id)?;
        let idx = parent
            .value_index(node.page_id)
            .ok_or(BTreeError::Corrupted("node missing from its parent"))?;

        if idx > 0 {
            let left_pid = parent.children[idx - 1];
            let mut left = self.read_internal(left_pid)?;
            if left.children.len() > left.min_size() {
                // The parent separator rotates down; the donor's last
                // separator rotates up.
                let moved_child = left.children.pop().expect("donor node is not empty");
                let moved_key = left.keys.pop().expect("donor node is not empty");
                node.children.insert(0, moved_child);
                node.keys.insert(1, parent.keys[idx]);
                parent.keys[idx] = moved_key;
                self.set_parent(moved_child, node.page_id)?;
                self.write_internal(&left)?;
                self.write_internal(&node)?;
                self.write_internal(&parent)?;
                return Ok(());
            }
        }

        if idx + 1 < parent.children.len() {
            let right_pid = parent.children[idx + 1];
            let mut right = self.read_internal(right_pid)?;
            if right.children.len() > right.min_size() {
                let moved_child = right.children.remove(0);
                let up_key = right.keys.remove(1);
                node.children.push(moved_child);
                node.keys.push(parent.keys[idx + 1]);
                parent.keys[idx + 1] = up_key;
                self.set_parent(moved_child, node.page_id)?;
                self.write_internal(&right)?;
                self.write_internal(&node)?;
                self.write_internal(&parent)?;
                return Ok(());
            }
        }

        if idx > 0 {
            let left_pid = parent.children[idx - 1];
            let mut left = self.read_internal(left_pid)?;
            left.keys.push(parent.keys[idx]);
            left.keys.extend(node.keys.drain(1..));
            let moved: Vec<PageId> = node.children.drain(..).collect();
            for &child in &moved {
                self.set_parent(child, left_pid)?;
            }
            left.children.extend(moved);
            parent.keys.remove(idx);
            parent.children.remove(idx);
            debug!("coalesced internal {} into {}", node.page_id, left_pid);
            self.write_internal(&left)?;
            self.write_internal(&parent)?;
            self.buffer_pool.delete_page(node.page_id)?;
        } else {
            let right_pid = parent.children[idx + 1];
            let mut right = self.read_internal(right_pid)?;
            node.keys.push(parent.keys[idx + 1]);
            node.keys.extend(right.keys.drain(1..));
            let moved: Vec<PageId> = right.children.drain(..).collect();
            for &child in &moved {
                self.set_parent(child, node.page_id)?;
            }
            node.children.extend(moved);
            parent.keys.remove(idx + 1);
            parent.children.remove(idx + 1);
            debug!("coalesced internal {} into {}", right_pid, node.page_id);
            self.write_internal(&node)?;
            self.write_internal(&parent)?;
            self.buffer_pool.delete_page(right_pid)?;
        }
        self.rebalance_internal(parent)
    }

    /// Root-specific deletion rules: an empty leaf root empties the tree; an
    /// internal root with one child promotes that child.
    fn adjust_root(&self, root: BTreeNode) -> Result<(), BTreeError> {
        match root {
            BTreeNode::Leaf(leaf) => {
                if leaf.keys.is_empty() {
                    self.set_root(INVALID_PAGE_ID)?;
                    self.buffer_pool.delete_page(leaf.page_id)?;
                }
                Ok(())
            }
            BTreeNode::Internal(node) => {
                if node.children.len() == 1 {
                    let child = node.children[0];
                    self.set_parent(child, INVALID_PAGE_ID)?;
                    self.set_root(child)?;
                    self.buffer_pool.delete_page(node.page_id)?;
                    debug!("promoted page {} to root", child);
                }
                Ok(())
            }
        }
    }
}
