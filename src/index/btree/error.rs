use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("node does not fit in a page")]
    NodeTooLarge,

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("deserialization error: {0}")]
    DeserializationError(String),

    #[error("page does not hold the expected node kind")]
    UnexpectedNodeKind,

    #[error("buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}
