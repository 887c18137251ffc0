//! Client Submission Path (spec §2 CSP, §4.2–§4.3, §6): one
//! [`ClientSession`] per connected queue pair, exposing the blocking
//! `put`/`get`/`buffered_put` API external page-eviction callers
//! consume.

use crate::error::{ClientError, Result};
use crate::poller::PollerHandle;
use crate::stats::SubmissionStats;
use crate::wait::StatusWait;
use rdpma_proto::control::{ControlWord, MessageKind, TxState};
use rdpma_proto::metadata::{metadata_slot_offset, page_slot_offset, MetadataSlot, PAGE_SIZE};
use rdpma_proto::{Key, NUM_ENTRY};
use rdpma_queue::IdSlotMap;
use rdpma_transport::{RdmaDevice, WorkRequest};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Bound on a single operation's send-CQ busy poll before it is
/// treated as a lost completion (spec §7 acknowledges this is a real
/// gap: "a lost reply ... does not time out — this is an accepted
/// limitation" for the *recv*-side reply; the *send*-side completion
/// for a synchronous local post is never actually lost on a sane
/// transport, so bounding this poll is a defensive cap, not a
/// protocol timeout).
const SEND_POLL_ATTEMPTS: usize = 1_000_000;

/// One client's handle onto a connected queue pair: the RDMA device,
/// this session's `qid`, and the bookkeeping the submission path needs
/// to drive PUT/GET handshakes against it.
pub struct ClientSession<D: RdmaDevice + 'static> {
    qid: u8,
    device: Arc<D>,
    metadata_base: u64,
    page_base: u64,
    max_num_pages: u64,
    ids: Arc<IdSlotMap<Arc<StatusWait>>>,
    /// Kept only to own the background receive poller; its `Drop` stops
    /// and joins the thread when the session goes away.
    poller: PollerHandle<D>,
    stats: Arc<SubmissionStats>,
    next_wr_id: AtomicU64,
}

impl<D: RdmaDevice + 'static> ClientSession<D> {
    /// Open a session over `device` (already bootstrapped and brought
    /// up to RTS by the caller), spawning its receive-side poller.
    pub fn new(qid: u8, device: Arc<D>, metadata_base: u64, page_base: u64, max_num_pages: u64) -> Self {
        let ids: Arc<IdSlotMap<Arc<StatusWait>>> = Arc::new(IdSlotMap::new());
        let poller = PollerHandle::spawn(device.clone(), ids.clone());
        Self {
            qid,
            device,
            metadata_base,
            page_base,
            max_num_pages,
            ids,
            poller,
            stats: Arc::new(SubmissionStats::new()),
            next_wr_id: AtomicU64::new(1),
        }
    }

    pub fn qid(&self) -> u8 {
        self.qid
    }

    pub fn stats(&self) -> &SubmissionStats {
        &self.stats
    }

    fn next_wr_id(&self) -> u64 {
        self.next_wr_id.fetch_add(1, Ordering::Relaxed)
    }

    fn metadata_offset(&self, msg_num: u16) -> u64 {
        self.metadata_base + metadata_slot_offset(self.qid, msg_num)
    }

    fn page_offset(&self, msg_num: u16) -> u64 {
        self.page_base + page_slot_offset(self.qid, msg_num, self.max_num_pages)
    }

    fn check_page_len(num: u8, page: &[u8]) -> Result<()> {
        let expected = num as usize * PAGE_SIZE as usize;
        if page.len() != expected {
            return Err(ClientError::WrongPageLength { num, expected, actual: page.len() });
        }
        Ok(())
    }

    /// `num` must fit the control word's 4-bit field before anything is
    /// posted (spec §9 Open Question: an out-of-range `num` is rejected
    /// with [`rdpma_proto::Error::Overflow`]-equivalent validation up
    /// front, not discovered mid-handshake).
    fn check_num_range(num: u8) -> Result<()> {
        if num == 0 || num > rdpma_proto::control::MAX_NUM_PAGES {
            return Err(ClientError::Proto(rdpma_proto::Error::FieldOutOfRange("num")));
        }
        Ok(())
    }

    /// Busy-poll this session's send CQ until `wr_id`'s completion
    /// appears (spec §4.2 step 2: "Client polls its send CQ for the
    /// signaled completion").
    fn poll_send_completion(&self, wr_id: u64) -> Result<()> {
        for _ in 0..SEND_POLL_ATTEMPTS {
            for completion in self.device.poll_send_cq(16) {
                if completion.wr_id == wr_id {
                    return match completion.status {
                        rdpma_transport::CompletionStatus::Success => Ok(()),
                        rdpma_transport::CompletionStatus::Error => {
                            Err(ClientError::Transport(rdpma_transport::TransportError::CompletionFailed {
                                wr_id,
                                status: "error".into(),
                            }))
                        }
                    };
                }
            }
            std::hint::spin_loop();
        }
        Err(ClientError::Proto(rdpma_proto::Error::Died))
    }

    /// PUT (spec §4.2): RDMA-write the page payload and its metadata
    /// directly to the server's fixed slot for this `(qid, msg_num)`,
    /// then block for the WRITE_REPLY/WRITE_COMMITTED acknowledgement.
    pub fn put(&self, page: &[u8], key: Key, num: u8) -> Result<()> {
        Self::check_num_range(num)?;
        Self::check_page_len(num, page)?;
        let wait = Arc::new(StatusWait::new());
        let msg_num = self.ids.alloc(wait.clone())?;
        let result = self.put_inner(page, key, num, msg_num, &wait);
        let _ = self.ids.remove(msg_num);
        result
    }

    fn put_inner(&self, page: &[u8], key: Key, num: u8, msg_num: u16, wait: &StatusWait) -> Result<()> {
        self.device.post_recv(msg_num as u64, 0, 0, 0)?;

        let page_addr = self.page_offset(msg_num);
        self.device.write_local(page_addr, page);

        let meta_addr = self.metadata_offset(msg_num);
        let meta = MetadataSlot { key, addr: 0, num: num as u64 };
        self.device.write_local(meta_addr, &meta.to_bytes());

        let cw = ControlWord::new(num, msg_num, MessageKind::Write, TxState::WriteBegin, self.qid)?;
        let page_wr = WorkRequest::rdma_write(self.next_wr_id(), page_addr, page.len() as u32, 0, page_addr, 0);
        let meta_wr_id = self.next_wr_id();
        let meta_wr = WorkRequest::rdma_write_with_imm(
            meta_wr_id,
            cw.encode(),
            meta_addr,
            MetadataSlot::WIRE_SIZE as u32,
            0,
            meta_addr,
            0,
        );
        let t_post = Instant::now();
        self.device.post_send(page_wr.chain(meta_wr))?;
        self.stats.record_post_send(t_post.elapsed());

        let t_poll_sr = Instant::now();
        self.poll_send_completion(meta_wr_id)?;
        self.stats.record_put_poll_sr(t_poll_sr.elapsed());

        let t_wait = Instant::now();
        let outcome = wait.wait()?;
        self.stats.record_put_wait(t_wait.elapsed());

        match (outcome.kind, outcome.state) {
            (MessageKind::WriteReply, TxState::WriteCommitted) => Ok(()),
            (kind, state) => Err(ClientError::UnexpectedReply { kind, state }),
        }
    }

    /// `buffered_put` is identical to `put` in the original source
    /// (spec §9 Open Question, resolved in SPEC_FULL.md §5): any
    /// batching is invisible to the caller, so this is a thin alias.
    pub fn buffered_put(&self, page: &[u8], key: Key, num: u8) -> Result<()> {
        self.put(page, key, num)
    }

    /// GET (spec §4.3): request the key, and on a hit RDMA_READ the
    /// server's staged buffer into `page`; returns
    /// [`ClientError::NotFound`] on `READ_ABORTED`.
    pub fn get(&self, page: &mut [u8], key: Key, num: u8) -> Result<()> {
        Self::check_num_range(num)?;
        Self::check_page_len(num, page)?;
        let wait = Arc::new(StatusWait::new());
        let msg_num = self.ids.alloc(wait.clone())?;
        let result = self.get_inner(page, key, num, msg_num, &wait);
        let _ = self.ids.remove(msg_num);
        result
    }

    fn get_inner(&self, page: &mut [u8], key: Key, num: u8, msg_num: u16, wait: &StatusWait) -> Result<()> {
        self.device.post_recv(msg_num as u64, 0, 0, 0)?;

        let dest_addr = self.page_offset(msg_num);
        let meta_addr = self.metadata_offset(msg_num);
        let meta = MetadataSlot { key, addr: dest_addr, num: num as u64 };
        self.device.write_local(meta_addr, &meta.to_bytes());

        // READ_BEGIN's `num` field is 0 in the imm word (spec §4.3
        // step 1); the real count travels in the metadata slot, so we
        // bypass `ControlWord::new`'s `num >= 1` check with a direct
        // struct literal, the same exception `ControlWord::decode`
        // documents for request-kind control words.
        let cw = ControlWord {
            num: 0,
            msg_num,
            kind: MessageKind::ReadRequest,
            state: TxState::ReadBegin,
            qid: self.qid,
        };
        let req_wr_id = self.next_wr_id();
        let req_wr = WorkRequest::rdma_write_with_imm(
            req_wr_id,
            cw.encode(),
            meta_addr,
            MetadataSlot::WIRE_SIZE as u32,
            0,
            meta_addr,
            0,
        );
        let t_post = Instant::now();
        self.device.post_send(req_wr)?;
        self.stats.record_post_send(t_post.elapsed());
        self.poll_send_completion(req_wr_id)?;

        let t_wait = Instant::now();
        let outcome = wait.wait()?;
        self.stats.record_put_wait(t_wait.elapsed());

        match (outcome.kind, outcome.state) {
            (MessageKind::ReadRequestReply, TxState::ReadAborted) => Err(ClientError::NotFound),
            (MessageKind::ReadRequestReply, TxState::ReadReady) => {
                self.complete_read(page, key, num, msg_num, meta_addr)
            }
            (kind, state) => Err(ClientError::UnexpectedReply { kind, state }),
        }
    }

    /// Pull the staged value from the server's reply-supplied buffer
    /// address into `page`, then post READ_REPLY so the server frees
    /// its staging (spec §4.3 steps 3–4).
    fn complete_read(&self, page: &mut [u8], key: Key, num: u8, msg_num: u16, meta_addr: u64) -> Result<()> {
        let reply_bytes = self.device.read_local(meta_addr, MetadataSlot::WIRE_SIZE);
        let reply = MetadataSlot::from_bytes(&reply_bytes);

        let dest_addr = self.page_offset(msg_num);
        let read_wr_id = self.next_wr_id();
        let read_wr = WorkRequest::rdma_read(read_wr_id, dest_addr, page.len() as u32, 0, reply.addr, 0);
        let t_read = Instant::now();
        self.device.post_send(read_wr)?;
        self.poll_send_completion(read_wr_id)?;
        self.stats.record_rdma_read(t_read.elapsed());

        let bytes = self.device.read_local(dest_addr, page.len());
        page.copy_from_slice(&bytes);

        let ack_meta = MetadataSlot { key, addr: 0, num: num as u64 };
        self.device.write_local(meta_addr, &ack_meta.to_bytes());
        let ack = ControlWord::new(num, msg_num, MessageKind::ReadReply, TxState::ReadCommitted, self.qid)?;
        let ack_wr = WorkRequest::rdma_write_with_imm(
            self.next_wr_id(),
            ack.encode(),
            meta_addr,
            MetadataSlot::WIRE_SIZE as u32,
            0,
            meta_addr,
            0,
        );
        self.device.post_send(ack_wr)?;
        Ok(())
    }
}

/// Bound matching [`rdpma_proto::NUM_ENTRY`], surfaced here for
/// callers sizing their own request pipelining.
pub const MAX_IN_FLIGHT_PER_SESSION: u16 = NUM_ENTRY;

#[cfg(test)]
mod tests {
    use super::*;
    use rdpma_index::{HeapPool, Index, PmPool, SplitPolicy};
    use rdpma_server::dispatch::{ConnectionTable, ProtocolEngine};
    use rdpma_server::staging::StagingPool;
    use rdpma_server::worker::WorkerContext;
    use rdpma_transport::LoopbackServer;
    use std::sync::atomic::AtomicBool;

    /// Shared registered-memory layout for these in-process tests: the
    /// metadata region, page region, and staging arena each get a
    /// disjoint slice of one small `LoopbackServer`-backed buffer
    /// (production bases would be real RDMA-registered VA ranges, but
    /// `LoopbackDevice` backs `local`/`remote` with plain `Vec<u8>`, so
    /// every base used here must fit inside `DEVICE_MEM`).
    const DEVICE_MEM: usize = 1 << 26;
    const METADATA_BASE: u64 = 0;
    const PAGE_BASE: u64 = 1 << 22;
    const STAGING_BASE: u64 = 1 << 25;
    const MAX_NUM_PAGES: u64 = 15;

    /// A tiny embedded server: one `LoopbackServer`, one index, one
    /// worker queue, wired exactly the way `rdpma-server`'s `main`
    /// wires them, but pumped from background threads this harness
    /// owns so tests can join them deterministically.
    struct EmbeddedServer {
        stop: Arc<AtomicBool>,
        handles: Vec<std::thread::JoinHandle<()>>,
    }

    impl EmbeddedServer {
        fn start(server: &LoopbackServer, qid: u8) -> (Self, rdpma_transport::LoopbackDevice) {
            let (server_side, client_side) = server.connect(DEVICE_MEM);
            let server_side = Arc::new(server_side);

            let pool: Arc<dyn PmPool> = Arc::new(HeapPool::new(0, PAGE_SIZE as usize));
            let index = Arc::new(Index::open(vec![pool.clone()], SplitPolicy::Skewed).unwrap());
            let rql = Arc::new(rdpma_queue::RequestQueueLayer::new(1));
            let connections = Arc::new(ConnectionTable::new());
            connections.register(qid, server_side.clone());
            let staging = Arc::new(StagingPool::new(STAGING_BASE, 64, MAX_NUM_PAGES));

            let stop = Arc::new(AtomicBool::new(false));
            let mut handles = Vec::new();

            let engine = ProtocolEngine::new(server_side.clone(), index.clone(), rql.clone(), METADATA_BASE);
            let stop1 = stop.clone();
            handles.push(std::thread::spawn(move || {
                while !stop1.load(Ordering::Acquire) {
                    if engine.poll_once() == 0 {
                        std::thread::yield_now();
                    }
                }
            }));

            let ctx = WorkerContext {
                node_id: 0,
                index,
                pool,
                staging,
                connections,
                rql,
                metadata_base: METADATA_BASE,
                page_base: PAGE_BASE,
                max_num_pages: MAX_NUM_PAGES,
            };
            let stop2 = stop.clone();
            handles.push(std::thread::spawn(move || {
                while !stop2.load(Ordering::Acquire) {
                    if !ctx.run_once() {
                        std::thread::yield_now();
                    }
                }
            }));

            (Self { stop, handles }, client_side)
        }
    }

    impl Drop for EmbeddedServer {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Release);
            for h in self.handles.drain(..) {
                let _ = h.join();
            }
        }
    }

    #[test]
    fn put_then_get_round_trips_byte_for_byte() {
        let server = LoopbackServer::new(DEVICE_MEM);
        let (_embedded, client_device) = EmbeddedServer::start(&server, 0);
        let session = ClientSession::new(0, Arc::new(client_device), METADATA_BASE, PAGE_BASE, MAX_NUM_PAGES);

        let key = 0xface_u64;
        let page = vec![0xab_u8; PAGE_SIZE as usize];
        session.put(&page, key, 1).unwrap();

        let mut got = vec![0u8; PAGE_SIZE as usize];
        session.get(&mut got, key, 1).unwrap();
        assert_eq!(got, page);
    }

    #[test]
    fn get_for_unknown_key_is_not_found() {
        let server = LoopbackServer::new(DEVICE_MEM);
        let (_embedded, client_device) = EmbeddedServer::start(&server, 0);
        let session = ClientSession::new(0, Arc::new(client_device), METADATA_BASE, PAGE_BASE, MAX_NUM_PAGES);

        let mut got = vec![0u8; PAGE_SIZE as usize];
        let err = session.get(&mut got, 0x1234, 1).unwrap_err();
        assert!(matches!(err, ClientError::NotFound));
    }

    #[test]
    fn buffered_put_is_identical_to_put() {
        let server = LoopbackServer::new(DEVICE_MEM);
        let (_embedded, client_device) = EmbeddedServer::start(&server, 0);
        let session = ClientSession::new(0, Arc::new(client_device), METADATA_BASE, PAGE_BASE, MAX_NUM_PAGES);

        let key = 77u64;
        let page = vec![3u8; PAGE_SIZE as usize];
        session.buffered_put(&page, key, 1).unwrap();
        let mut got = vec![0u8; PAGE_SIZE as usize];
        session.get(&mut got, key, 1).unwrap();
        assert_eq!(got, page);
    }

    #[test]
    fn wrong_page_length_is_rejected_before_any_io() {
        let server = LoopbackServer::new(DEVICE_MEM);
        let (_embedded, client_device) = EmbeddedServer::start(&server, 0);
        let session = ClientSession::new(0, Arc::new(client_device), METADATA_BASE, PAGE_BASE, MAX_NUM_PAGES);
        let err = session.put(&[0u8; 10], 1, 1).unwrap_err();
        assert!(matches!(err, ClientError::WrongPageLength { .. }));
    }

    #[test]
    fn concurrent_puts_to_distinct_keys_all_succeed() {
        let server = LoopbackServer::new(DEVICE_MEM);
        let (_embedded, client_device) = EmbeddedServer::start(&server, 0);
        let session = Arc::new(ClientSession::new(0, Arc::new(client_device), METADATA_BASE, PAGE_BASE, MAX_NUM_PAGES));

        let handles: Vec<_> = (0..16u64)
            .map(|k| {
                let session = session.clone();
                std::thread::spawn(move || {
                    let page = vec![k as u8; PAGE_SIZE as usize];
                    session.put(&page, k + 1, 1).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for k in 0..16u64 {
            let mut got = vec![0u8; PAGE_SIZE as usize];
            session.get(&mut got, k + 1, 1).unwrap();
            assert_eq!(got, vec![k as u8; PAGE_SIZE as usize]);
        }
    }
}
