use thiserror::Error;
use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("buffer pool could not allocate a page for a structural operation")]
    OutOfMemory,

    #[error("corrupted node: {0}")]
    Corrupted(&'static str),

    #[error("buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}
