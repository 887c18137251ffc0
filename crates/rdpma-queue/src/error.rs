//! Errors internal to the request queue layer and the bounded id map.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// A queue's bounded capacity was reached; backpressure per spec §5
    /// ("worker threads spin on their lock-free queue via a bounded busy
    /// poll") — producers see this instead of growing without bound.
    #[error("request queue is at capacity")]
    Full,

    /// The bounded id space (`NUM_ENTRY` slots) has no free id, mirroring
    /// the original `rdpma_prep_nsw`'s `idr` allocator running out.
    #[error("id space exhausted (NUM_ENTRY slots all in use)")]
    IdSpaceExhausted,

    /// `get(id)`/`remove(id)` was called with an id currently unoccupied.
    #[error("id {0} has no registered entry")]
    NotRegistered(u16),

    /// A descriptor named a NUMA node index outside the configured range.
    #[error("node id {0} has no queue pair")]
    InvalidNode(usize),
}

impl From<QueueError> for rdpma_proto::Error {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Full | QueueError::IdSpaceExhausted => rdpma_proto::Error::Overflow,
            QueueError::NotRegistered(_) | QueueError::InvalidNode(_) => rdpma_proto::Error::NoHandler,
        }
    }
}
