//! Status-wait descriptor (spec §3): one per pending operation,
//! registered in a per-session [`rdpma_queue::IdSlotMap`] under its
//! `msg_num` and released by [`crate::poller::CompletionPoller`] when
//! the matching reply's imm-data arrives.
//!
//! Spec §5 names this the client submitter's only suspension point:
//! "Client submitter waits on a per-descriptor wait primitive (signal
//! delivery wakes it)". We model signal delivery as
//! [`StatusWait::cancel`], giving the waiter [`rdpma_proto::Error::Died`]
//! the way an interrupted original client thread observes `-EHOSTDOWN`.

use parking_lot::{Condvar, Mutex};
use rdpma_proto::control::{MessageKind, TxState};

/// What the reply carried, handed to the blocked caller on wakeup.
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    pub kind: MessageKind,
    pub state: TxState,
}

enum Slot {
    Pending,
    Ready(Outcome),
    Died,
}

/// The wait primitive itself: a caller blocks in [`Self::wait`] until
/// [`Self::signal`] or [`Self::cancel`] is called from the completion
/// poller thread.
pub struct StatusWait {
    slot: Mutex<Slot>,
    cv: Condvar,
}

impl StatusWait {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            cv: Condvar::new(),
        }
    }

    /// Block until a reply is posted for this descriptor.
    pub fn wait(&self) -> rdpma_proto::Result<Outcome> {
        let mut slot = self.slot.lock();
        loop {
            match &*slot {
                Slot::Pending => self.cv.wait(&mut slot),
                Slot::Ready(outcome) => return Ok(*outcome),
                Slot::Died => return Err(rdpma_proto::Error::Died),
            }
        }
    }

    pub fn signal(&self, outcome: Outcome) {
        *self.slot.lock() = Slot::Ready(outcome);
        self.cv.notify_one();
    }

    /// Release a waiter with a fatal status, mirroring "signal delivery
    /// (interrupt) cancels submitter waits with a DIED status" (spec §5).
    pub fn cancel(&self) {
        *self.slot.lock() = Slot::Died;
        self.cv.notify_one();
    }
}

impl Default for StatusWait {
    fn default() -> Self {
        Self::new()
    }
}
