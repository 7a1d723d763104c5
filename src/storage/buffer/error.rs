use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("buffer pool exhausted: no free or evictable frame")]
    PoolExhausted,

    #[error("page {0} not resident")]
    PageNotFound(PageId),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),
}
