use std::sync::Arc;
use log::warn;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::BufferPoolManager;
use crate::index::btree::error::BTreeError;
use crate::index::btree::page::{BTreeNode, LeafNode};

/// Forward iterator over the tree's (key, RID) pairs in key order.
///
/// Each leaf is fetched, decoded and unpinned before its entries are
/// yielded, then the chain advances through `next_page_id`. An I/O failure
/// mid-scan ends the iteration early with a warning; the scan holds no pins
/// between steps, so nothing leaks.
pub struct BTreeIterator {
    buffer_pool: Arc<BufferPoolManager>,
    leaf: Option<LeafNode>,
    index: usize,
}

impl BTreeIterator {
    pub(crate) fn empty(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            leaf: None,
            index: 0,
        }
    }

    pub(crate) fn new(buffer_pool: Arc<BufferPoolManager>, leaf: LeafNode, index: usize) -> Self {
        Self {
            buffer_pool,
            leaf: Some(leaf),
            index,
        }
    }

    fn fetch_leaf(&self, page_id: PageId) -> Result<LeafNode, BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let node = {
            let guard = page.read();
            BTreeNode::load(&guard)
        };
        self.buffer_pool.unpin_page(page_id, false);
        match node? {
            BTreeNode::Leaf(leaf) => Ok(leaf),
            BTreeNode::Internal(_) => Err(BTreeError::Corrupted("leaf chain reached an internal node")),
        }
    }
}

impl Iterator for BTreeIterator {
    type Item = (i64, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf = self.leaf.as_ref()?;
            if self.index < leaf.keys.len() {
                let item = (leaf.keys[self.index], leaf.values[self.index]);
                self.index += 1;
                return Some(item);
            }

            let next_page_id = leaf.next_page_id;
            if next_page_id == INVALID_PAGE_ID {
                self.leaf = None;
                return None;
            }
            match self.fetch_leaf(next_page_id) {
                Ok(next_leaf) => {
                    self.leaf = Some(next_leaf);
                    self.index = 0;
                }
                Err(e) => {
                    warn!("index scan stopped at page {}: {}", next_page_id, e);
                    self.leaf = None;
                    return None;
                }
            }
        }
    }
}
