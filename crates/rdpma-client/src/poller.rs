//! The client's receive-side poller (spec §2 data flow: "The client's
//! CSP blocks on a per-request wait primitive that is released by its
//! receive-side poller"). One [`CompletionPoller`] runs per
//! [`crate::session::ClientSession`], draining that session's recv CQ
//! and handing each decoded reply to the [`crate::wait::StatusWait`]
//! registered under its `msg_num`.

use crate::wait::Outcome;
use parking_lot::Mutex;
use rdpma_proto::control::ControlWord;
use rdpma_queue::IdSlotMap;
use rdpma_transport::RdmaDevice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Completions drained per `poll_once` call (spec §5's "bounded busy
/// poll", mirrored from the server's `POLL_BATCH`).
const POLL_BATCH: usize = 64;

pub struct CompletionPoller<D: RdmaDevice> {
    device: Arc<D>,
    ids: Arc<IdSlotMap<Arc<crate::wait::StatusWait>>>,
    stop: AtomicBool,
}

impl<D: RdmaDevice + 'static> CompletionPoller<D> {
    pub fn new(device: Arc<D>, ids: Arc<IdSlotMap<Arc<crate::wait::StatusWait>>>) -> Arc<Self> {
        Arc::new(Self { device, ids, stop: AtomicBool::new(false) })
    }

    /// Drain up to one batch of receive completions, signaling every
    /// waiter whose `msg_num` they answer. Returns the number handled.
    pub fn poll_once(&self) -> usize {
        let completions = self.device.poll_recv_cq(POLL_BATCH);
        let mut handled = 0;
        for completion in completions {
            let Some(imm) = completion.imm_data else {
                tracing::warn!("client recv completion carried no immediate data; dropped");
                continue;
            };
            let cw = match ControlWord::decode(imm) {
                Ok(cw) => cw,
                Err(e) => {
                    tracing::warn!(error = %e, "bad reply control word; dropped");
                    continue;
                }
            };
            match self.ids.get(cw.msg_num) {
                Ok(wait) => {
                    wait.signal(Outcome { kind: cw.kind, state: cw.state });
                    handled += 1;
                }
                Err(_) => {
                    tracing::warn!(msg_num = cw.msg_num, "reply for an id with no registered waiter");
                }
            }
        }
        handled
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Spawn a background thread that calls [`Self::poll_once`] in a
    /// loop until [`Self::request_stop`] is called, yielding between
    /// empty polls (spec §5's busy poll, "implementation may yield").
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let poller = self.clone();
        std::thread::spawn(move || {
            while !poller.should_stop() {
                if poller.poll_once() == 0 {
                    std::thread::yield_now();
                }
            }
        })
    }
}

/// Handle bundling a spawned poller with the join handle needed to
/// shut it down cleanly, so a [`crate::session::ClientSession`] can
/// tear one down without leaking the thread.
pub struct PollerHandle<D: RdmaDevice> {
    poller: Arc<CompletionPoller<D>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl<D: RdmaDevice + 'static> PollerHandle<D> {
    pub fn spawn(device: Arc<D>, ids: Arc<IdSlotMap<Arc<crate::wait::StatusWait>>>) -> Self {
        let poller = CompletionPoller::new(device, ids);
        let join = poller.spawn();
        Self { poller, join: Mutex::new(Some(join)) }
    }
}

impl<D: RdmaDevice> Drop for PollerHandle<D> {
    fn drop(&mut self) {
        self.poller.request_stop();
        if let Some(join) = self.join.lock().take() {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::StatusWait;
    use rdpma_proto::control::{MessageKind, TxState};
    use rdpma_transport::{LoopbackDevice, WorkRequest};

    #[test]
    fn poll_once_signals_the_registered_waiter() {
        let (client, server) = LoopbackDevice::pair(4096, 4096);
        let client = Arc::new(client);
        let ids: Arc<IdSlotMap<Arc<StatusWait>>> = Arc::new(IdSlotMap::new());
        let wait = Arc::new(StatusWait::new());
        let msg_num = ids.alloc(wait.clone()).unwrap();

        let cw = ControlWord::new(1, msg_num, MessageKind::WriteReply, TxState::WriteCommitted, 0).unwrap();
        server.post_send(WorkRequest::rdma_write_with_imm(1, cw.encode(), 0, 0, 0, 0, 0)).unwrap();

        let poller = CompletionPoller::new(client, ids);
        assert_eq!(poller.poll_once(), 1);
        let outcome = wait.wait().unwrap();
        assert_eq!(outcome.state, TxState::WriteCommitted);
    }

    #[test]
    fn spawn_and_drop_shuts_the_thread_down() {
        let (client, _server) = LoopbackDevice::pair(4096, 4096);
        let ids: Arc<IdSlotMap<Arc<StatusWait>>> = Arc::new(IdSlotMap::new());
        let handle = PollerHandle::spawn(Arc::new(client), ids);
        drop(handle);
    }
}
