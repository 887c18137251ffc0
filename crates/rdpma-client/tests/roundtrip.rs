//! End-to-end submission-path tests (spec §8's testable properties:
//! round-trip byte equality, Insert-Get consistency, absence for
//! never-inserted keys) driven through the public crate API against
//! an embedded `rdpma-server` dispatch engine and worker, the same
//! harness shape as `session`'s own unit tests but exercised as a
//! black box from outside the crate.

use rdpma_client::ClientSession;
use rdpma_index::{HeapPool, Index, PmPool, SplitPolicy};
use rdpma_queue::RequestQueueLayer;
use rdpma_server::dispatch::{ConnectionTable, ProtocolEngine};
use rdpma_server::staging::StagingPool;
use rdpma_server::worker::WorkerContext;
use rdpma_transport::{LoopbackDevice, LoopbackServer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const DEVICE_MEM: usize = 1 << 26;
const METADATA_BASE: u64 = 0;
const PAGE_BASE: u64 = 1 << 22;
const STAGING_BASE: u64 = 1 << 25;
const MAX_NUM_PAGES: u64 = 15;
const PAGE_SIZE: usize = rdpma_proto::PAGE_SIZE as usize;

struct EmbeddedServer {
    stop: Arc<AtomicBool>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl EmbeddedServer {
    fn start(server: &LoopbackServer, qid: u8) -> (Self, LoopbackDevice) {
        let (server_side, client_side) = server.connect(DEVICE_MEM);
        let server_side = Arc::new(server_side);

        let pool: Arc<dyn PmPool> = Arc::new(HeapPool::new(0, PAGE_SIZE));
        let index = Arc::new(Index::open(vec![pool.clone()], SplitPolicy::Skewed).unwrap());
        let rql = Arc::new(RequestQueueLayer::new(1));
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

fn new_session(qid: u8) -> (EmbeddedServer, ClientSession<LoopbackDevice>) {
    let server = LoopbackServer::new(DEVICE_MEM);
    let (embedded, client_device) = EmbeddedServer::start(&server, qid);
    let session = ClientSession::new(qid, Arc::new(client_device), METADATA_BASE, PAGE_BASE, MAX_NUM_PAGES);
    (embedded, session)
}

#[test]
fn single_page_put_get_round_trips_byte_for_byte() {
    let (_embedded, session) = new_session(0);
    let key = 0x1000u64;
    let page: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 251) as u8).collect();
    session.put(&page, key, 1).unwrap();

    let mut got = vec![0u8; PAGE_SIZE];
    session.get(&mut got, key, 1).unwrap();
    assert_eq!(got, page);
}

#[test]
fn multi_page_value_round_trips() {
    let (_embedded, session) = new_session(0);
    let key = 0x2000u64;
    let num = 3u8;
    let page = vec![0x77u8; num as usize * PAGE_SIZE];
    session.put(&page, key, num).unwrap();

    let mut got = vec![0u8; num as usize * PAGE_SIZE];
    session.get(&mut got, key, num).unwrap();
    assert_eq!(got, page);
}

#[test]
fn overwriting_a_key_replaces_its_value() {
    let (_embedded, session) = new_session(0);
    let key = 0x3000u64;
    session.put(&vec![1u8; PAGE_SIZE], key, 1).unwrap();
    session.put(&vec![2u8; PAGE_SIZE], key, 1).unwrap();

    let mut got = vec![0u8; PAGE_SIZE];
    session.get(&mut got, key, 1).unwrap();
    assert_eq!(got, vec![2u8; PAGE_SIZE]);
}

#[test]
fn never_inserted_key_is_not_found() {
    let (_embedded, session) = new_session(0);
    let mut got = vec![0u8; PAGE_SIZE];
    let err = session.get(&mut got, 0x9999, 1).unwrap_err();
    assert!(matches!(err, rdpma_client::ClientError::NotFound));
}

#[test]
fn many_distinct_keys_all_stay_independently_retrievable() {
    let (_embedded, session) = new_session(0);
    for k in 0..32u64 {
        session.put(&vec![k as u8; PAGE_SIZE], k + 1, 1).unwrap();
    }
    for k in 0..32u64 {
        let mut got = vec![0u8; PAGE_SIZE];
        session.get(&mut got, k + 1, 1).unwrap();
        assert_eq!(got, vec![k as u8; PAGE_SIZE]);
    }
}
