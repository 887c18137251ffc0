// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `rdpma-client-demo` binary: CLI, tracing, and one `ClientSession`
//! driven through a PUT then a GET.
//!
//! spec §1 treats the RDMA transport's connection objects as an
//! out-of-scope external collaborator; this binary has no `ibverbs`
//! NIC to bind to, so it embeds an in-process `rdpma_transport::
//! LoopbackServer` plus the `rdpma-server` dispatch engine and worker
//! pool on background threads, the same way `rdpma-server`'s own
//! binary would drive a real connection. `ClientSession` itself is
//! generic over `RdmaDevice` and cannot tell the difference.

use anyhow::Result;
use clap::Parser;
use rdpma_client::config::Args;
use rdpma_client::ClientSession;
use rdpma_index::{HeapPool, Index, PmPool, SplitPolicy};
use rdpma_queue::RequestQueueLayer;
use rdpma_server::dispatch::{ConnectionTable, ProtocolEngine};
use rdpma_server::staging::StagingPool;
use rdpma_server::worker::WorkerContext;
use rdpma_transport::LoopbackServer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const METADATA_BASE: u64 = 0;
const PAGE_BASE: u64 = 1 << 22;
const STAGING_BASE: u64 = 1 << 25;
const STAGING_CHUNKS: usize = 256;
const DEVICE_MEM_SIZE: usize = 1 << 26;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let max_num_pages = args.max_num_pages.max(1) as u64;
    let qid: u8 = 0;

    let transport = LoopbackServer::new(DEVICE_MEM_SIZE);
    let (server_side, client_side) = transport.connect(DEVICE_MEM_SIZE);
    let server_side = Arc::new(server_side);

    let pool: Arc<dyn PmPool> = Arc::new(HeapPool::new(0, rdpma_proto::PAGE_SIZE as usize));
    let index = Arc::new(Index::open(vec![pool.clone()], SplitPolicy::Skewed)?);
    let rql = Arc::new(RequestQueueLayer::new(1));
    let connections = Arc::new(ConnectionTable::new());
    connections.register(qid, server_side.clone());
    let staging = Arc::new(StagingPool::new(STAGING_BASE, STAGING_CHUNKS, max_num_pages));

    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();

    let engine = ProtocolEngine::new(server_side.clone(), index.clone(), rql.clone(), METADATA_BASE);
    let stop1 = stop.clone();
    handles.push(thread::spawn(move || {
        while !stop1.load(Ordering::Acquire) {
            if engine.poll_once() == 0 {
                thread::yield_now();
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
        max_num_pages,
    };
    let stop2 = stop.clone();
    handles.push(thread::spawn(move || {
        while !stop2.load(Ordering::Acquire) {
            if !ctx.run_once() {
                thread::yield_now();
            }
        }
    }));

    let session = ClientSession::new(qid, Arc::new(client_side), METADATA_BASE, PAGE_BASE, max_num_pages);

    let key: rdpma_proto::Key = 0x4242;
    let page = vec![0x5a_u8; rdpma_proto::PAGE_SIZE as usize];
    session.put(&page, key, 1)?;
    println!("put key={key:#x} ({} bytes) committed", page.len());

    let mut got = vec![0u8; rdpma_proto::PAGE_SIZE as usize];
    session.get(&mut got, key, 1)?;
    println!("get key={key:#x} round-tripped correctly: {}", got == page);

    match session.get(&mut got, key.wrapping_add(1), 1) {
        Err(e) => println!("get for an absent key failed as expected: {e}"),
        Ok(()) => println!("unexpected hit for an absent key"),
    }

    if args.print_stats {
        print!("{}", session.stats().print_stat());
    }

    drop(session);
    stop.store(true, Ordering::Release);
    for h in handles {
        let _ = h.join();
    }
    Ok(())
}
