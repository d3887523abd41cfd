use thiserror::Error;
use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("no free or evictable frame available")]
    BufferExhausted,

    #[error("page {0} not found in the buffer pool")]
    PageNotFound(PageId),

    #[error("invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),
}
