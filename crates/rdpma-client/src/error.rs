//! Errors internal to the client submission path.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// A CQ completion (or the decoded reply) carried a non-success
    /// outcome; the originating `put`/`get` fails and propagates this
    /// (spec §7: "CQ completions with non-success status abort the
    /// request and propagate failure").
    #[error(transparent)]
    Proto(#[from] rdpma_proto::Error),

    #[error(transparent)]
    Transport(#[from] rdpma_transport::TransportError),

    #[error(transparent)]
    Queue(#[from] rdpma_queue::QueueError),

    /// The page buffer's length did not match `num * PAGE_SIZE`.
    #[error("page buffer is {actual} bytes, expected {expected} for num={num}")]
    WrongPageLength { num: u8, expected: usize, actual: usize },

    /// A reply arrived carrying a state this handshake never expects
    /// (e.g. a `WriteReply` answering a `get`).
    #[error("unexpected reply state {state:?} for {kind:?}")]
    UnexpectedReply { kind: rdpma_proto::control::MessageKind, state: rdpma_proto::control::TxState },

    /// The read key was absent server-side (`READ_ABORTED` in-band
    /// reply, spec §4.3 step 3).
    #[error("key not found")]
    NotFound,
}
