use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use tempfile::NamedTempFile;

use sayandb::index::btree::BPlusTree;
use sayandb::storage::buffer::BufferPoolManager;
use sayandb::transaction::concurrency::{IsolationLevel, LockManager, Transaction};

pub const TEST_REPLACER_K: usize = 2;

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, TEST_REPLACER_K, path)?);
    Ok((buffer_pool, file))
}

// Create a B+Tree with small fanouts so structural changes kick in early
#[allow(dead_code)]
pub fn create_test_tree(
    pool_size: usize,
    leaf_max: usize,
    internal_max: usize,
) -> Result<(BPlusTree, Arc<BufferPoolManager>, NamedTempFile)> {
    let (buffer_pool, file) = create_test_buffer_pool(pool_size)?;
    let tree = BPlusTree::new(buffer_pool.clone(), leaf_max, internal_max)?;
    Ok((tree, buffer_pool, file))
}

// Lock manager without the background detector; tests drive detection by hand
#[allow(dead_code)]
pub fn create_test_lock_manager() -> Arc<LockManager> {
    Arc::new(LockManager::new(Duration::from_millis(10)))
}

#[allow(dead_code)]
pub fn make_txn(id: u32, isolation: IsolationLevel) -> Arc<Transaction> {
    Arc::new(Transaction::new(id, isolation))
}
