//! Queue-pair state machine and the connection parameters spec §6
//! fixes for every QP: "INIT→RTR→RTS with path-MTU 4096, retry 7,
//! rnr-retry 7, max-rd-atomic 16".

use crate::error::{Result, TransportError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpState {
    Reset,
    Init,
    Rtr,
    Rts,
}

/// Fixed connection parameters applied during each QP's INIT→RTR→RTS
/// transition (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct QpParams {
    pub path_mtu: u32,
    pub retry_count: u8,
    pub rnr_retry: u8,
    pub max_rd_atomic: u8,
}

impl Default for QpParams {
    fn default() -> Self {
        Self {
            path_mtu: 4096,
            retry_count: 7,
            rnr_retry: 7,
            max_rd_atomic: 16,
        }
    }
}

/// Deadline on connection-manager operations (spec §5: "Connection
/// manager operations use a 60-second deadline; on expiry the queue is
/// torn down").
pub const CM_TIMEOUT: Duration = Duration::from_secs(60);

/// Advance `current` to `next`, enforcing the only legal sequence
/// (Reset→Init→Rtr→Rts, spec §6). Returns the new state.
pub fn transition(current: QpState, next: QpState) -> Result<QpState> {
    let legal = matches!(
        (current, next),
        (QpState::Reset, QpState::Init) | (QpState::Init, QpState::Rtr) | (QpState::Rtr, QpState::Rts)
    );
    if legal {
        Ok(next)
    } else {
        Err(TransportError::IllegalQpTransition { from: current, to: next })
    }
}

/// Drive a fresh QP from `Reset` all the way to `Rts`, as the bootstrap
/// handshake does immediately after exchanging [`crate::bootstrap::BootstrapRecord`]s.
pub fn bring_up() -> Result<QpState> {
    let s = transition(QpState::Reset, QpState::Init)?;
    let s = transition(s, QpState::Rtr)?;
    transition(s, QpState::Rts)
}
