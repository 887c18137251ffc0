//! Errors internal to the transport shim.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("queue pair transition from {from:?} to {to:?} is not a legal next state")]
    IllegalQpTransition { from: QpState, to: QpState },

    #[error("work completion for wr_id {wr_id} failed: {status}")]
    CompletionFailed { wr_id: u64, status: String },

    #[error("bootstrap exchange I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bootstrap record was truncated or malformed")]
    MalformedRecord,

    #[error("bootstrap exchange did not complete within the connection-manager deadline")]
    Timeout,
}

use crate::qp::QpState;
