//! Protocol Engine (spec §2 PE, §4.8): the single receive-polling
//! thread that decodes the imm control word, steers requests to the
//! right NUMA queue, and the per-qid connection table reply posting
//! needs (a work request must go out on the specific QP it answers,
//! even though the receive CQ and registered memory are shared across
//! every connected client, per spec §5).

use parking_lot::RwLock;
use rdpma_index::Index;
use rdpma_proto::control::{ControlWord, MessageKind};
use rdpma_proto::metadata::{metadata_slot_offset, MetadataSlot};
use rdpma_queue::{Direction, RequestDescriptor, RequestQueueLayer};
use rdpma_transport::RdmaDevice;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps a connection's `qid` to the server-side device handle used to
/// post replies back on that specific QP.
pub struct ConnectionTable<D: RdmaDevice> {
    inner: RwLock<HashMap<u8, Arc<D>>>,
}

impl<D: RdmaDevice> ConnectionTable<D> {
    pub fn new() -> Self {
        Self { inner: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, qid: u8, device: Arc<D>) {
        self.inner.write().insert(qid, device);
    }

    pub fn get(&self, qid: u8) -> Option<Arc<D>> {
        self.inner.read().get(&qid).cloned()
    }

    pub fn deregister(&self, qid: u8) {
        self.inner.write().remove(&qid);
    }
}

impl<D: RdmaDevice> Default for ConnectionTable<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bound on completions drained per `poll_once` call, matching the
/// "bounded busy poll" framing of spec §5.
const POLL_BATCH: usize = 64;

pub struct ProtocolEngine<D: RdmaDevice> {
    /// Any one connected client's server-side device handle: recv CQ
    /// and registered memory are shared across every connection, so
    /// polling/reading through one handle observes all of them.
    shared: Arc<D>,
    index: Arc<Index>,
    rql: Arc<RequestQueueLayer>,
    metadata_base: u64,
}

impl<D: RdmaDevice> ProtocolEngine<D> {
    pub fn new(shared: Arc<D>, index: Arc<Index>, rql: Arc<RequestQueueLayer>, metadata_base: u64) -> Self {
        Self { shared, index, rql, metadata_base }
    }

    /// Drain up to `POLL_BATCH` receive completions, decode each one,
    /// and enqueue a request descriptor. Returns the number handled.
    pub fn poll_once(&self) -> usize {
        let completions = self.shared.poll_recv_cq(POLL_BATCH);
        let mut handled = 0;
        for completion in completions {
            // Re-post a receive buffer immediately, before acting on the
            // completion (spec §4.8: "on each completion it: re-posts a
            // receive, decodes the imm control word...").
            let _ = self.shared.post_recv(completion.wr_id, 0, 0, 0);

            let Some(imm) = completion.imm_data else {
                tracing::warn!("receive completion carried no immediate data; dropped");
                continue;
            };
            let cw = match ControlWord::decode(imm) {
                Ok(cw) => cw,
                Err(e) => {
                    tracing::warn!(error = %e, "bad imm control word; dropped");
                    continue;
                }
            };
            if self.dispatch_one(cw) {
                handled += 1;
            }
        }
        handled
    }

    fn dispatch_one(&self, cw: ControlWord) -> bool {
        let Some(direction) = Direction::from_kind(cw.kind) else {
            tracing::warn!(kind = ?cw.kind, "no server-side handler for message kind; dropped");
            return false;
        };

        let offset = metadata_slot_offset(cw.qid, cw.msg_num);
        let bytes = self.shared.read_local(self.metadata_base + offset, MetadataSlot::WIRE_SIZE);
        let slot = MetadataSlot::from_bytes(&bytes);

        let node_id = self.index.get_node_id(slot.key);
        let count = if cw.num > 0 { cw.num } else { slot.num as u8 };
        let desc = RequestDescriptor {
            node_id,
            msg_num: cw.msg_num,
            kind: cw.kind,
            count,
            origin_qid: cw.qid,
            key: slot.key,
        };
        match self.rql.enqueue(direction, desc) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, ?cw.kind, "request queue rejected descriptor");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdpma_index::policy::SplitPolicy;
    use rdpma_index::pm::HeapPool;
    use rdpma_proto::control::TxState;
    use rdpma_transport::LoopbackServer;
    use std::sync::Arc as StdArc;

    fn test_index() -> Arc<Index> {
        let pool: StdArc<dyn rdpma_index::pm::PmPool> = StdArc::new(HeapPool::new(0, 4096));
        Arc::new(Index::open(vec![pool], SplitPolicy::Skewed).unwrap())
    }

    #[test]
    fn unroutable_kind_is_dropped_without_panicking() {
        let server = LoopbackServer::new(1 << 20);
        let (s1, _c1) = server.connect(1 << 16);
        let shared = Arc::new(s1);
        let rql = Arc::new(RequestQueueLayer::new(1));
        let engine = ProtocolEngine::new(shared, test_index(), rql, 0);
        let cw = ControlWord::new(1, 0, MessageKind::WriteReply, TxState::WriteCommitted, 0).unwrap();
        assert!(!engine.dispatch_one(cw));
    }

    #[test]
    fn write_request_completion_enqueues_onto_write_queue() {
        let server = LoopbackServer::new(1 << 20);
        let (s1, c1) = server.connect(1 << 16);
        let shared = Arc::new(s1);
        let rql = Arc::new(RequestQueueLayer::new(4));
        let index = test_index();
        let engine = ProtocolEngine::new(shared.clone(), index.clone(), rql.clone(), 0);

        let qid = 3u8;
        let msg_num = 7u16;
        let key = 99u64;
        let offset = metadata_slot_offset(qid, msg_num);
        let slot = MetadataSlot { key, addr: 0, num: 2 };
        c1.write_local(offset, &slot.to_bytes());
        let cw = ControlWord::new(2, msg_num, MessageKind::WriteRequest, TxState::WriteBegin, qid).unwrap();
        c1.post_send(rdpma_transport::WorkRequest::rdma_write_with_imm(
            1,
            cw.encode(),
            offset,
            MetadataSlot::WIRE_SIZE as u32,
            0,
            offset,
            0,
        ))
        .unwrap();
        let handled = engine.poll_once();
        assert_eq!(handled, 1);
        let node_id = index.get_node_id(key);
        let desc = rql.try_dequeue(node_id).unwrap();
        assert_eq!(desc.key, key);
        assert_eq!(desc.count, 2);
        assert_eq!(desc.origin_qid, qid);
    }
}
