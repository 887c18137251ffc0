//! Errors internal to the dispatch engine and its worker handlers.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("no connection registered for qid {0}")]
    UnknownConnection(u8),

    #[error(transparent)]
    Queue(#[from] rdpma_queue::QueueError),

    #[error(transparent)]
    Index(#[from] rdpma_index::IndexError),

    #[error(transparent)]
    Proto(#[from] rdpma_proto::Error),

    #[error(transparent)]
    Transport(#[from] rdpma_transport::TransportError),

    #[error("invalid CPU mask: {0}")]
    InvalidMask(String),
}
