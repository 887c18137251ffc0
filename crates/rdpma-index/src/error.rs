//! Errors internal to the index and its persistent-memory pool.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("persistent-memory pool has no space left for a new segment")]
    PoolExhausted,

    #[error("persistent-memory pool has no space left in the page log")]
    LogExhausted,

    #[error("failed to open or map persistent-memory pool file {path}: {source}")]
    PoolOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("recovery found no root segment; pool was never initialized")]
    EmptyRoot,

    #[error("recovery found an inconsistent sibling chain: {0}")]
    CorruptChain(String),
}
