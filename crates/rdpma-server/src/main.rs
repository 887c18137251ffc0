// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `rdpma-server` binary: CLI, config, tracing, and the dispatch engine
//! wired together.
//!
//! spec §1 treats "the specific persistent-memory pool manager" and
//! the RDMA transport's connection objects as out-of-scope external
//! collaborators, only their interfaces specified. No `ibverbs`-style
//! crate is available in this workspace's dependency stack, so this
//! binary plugs `rdpma_transport::LoopbackServer` in as the transport
//! — every accepted TCP bootstrap connection gets a loopback-backed
//! device pair instead of a real queue pair. The dispatch engine and
//! worker handlers themselves are generic over `RdmaDevice` and do not
//! know the difference; swapping in a real NIC binding only touches
//! the `accept_connections` loop below.

use anyhow::{Context, Result};
use clap::Parser;
use rdpma_index::{FilePool, Index, PmPool, SplitPolicy};
use rdpma_queue::RequestQueueLayer;
use rdpma_server::config::{Args, Commands};
use rdpma_server::cpuset::pin_current_thread;
use rdpma_server::dispatch::{ConnectionTable, ProtocolEngine};
use rdpma_server::staging::StagingPool;
use rdpma_server::stats::format_stats;
use rdpma_server::worker::WorkerContext;
use rdpma_transport::{bootstrap, qp, LoopbackServer};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

/// Per-connection metadata base offset (spec §4.1); 4 GiB window per
/// qid is generous headroom for `NUM_ENTRY` metadata slots.
const METADATA_BASE: u64 = 0;
const PAGE_BASE: u64 = 1 << 32;
const STAGING_BASE: u64 = 3 << 32;
const STAGING_CHUNKS: usize = 1024;
const DEVICE_MEM_SIZE: usize = 1 << 33;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

/// Open both pool files per NUMA node (spec §6: "two pool files per
/// NUMA node — one index pool ... one log pool"). Returns
/// `(index_pools, log_pools)`, parallel by node id: `Index::open` only
/// ever touches the former (`alloc_segment`/`segment`/`root`), while
/// `rdpma-server`'s workers allocate and copy page payloads through
/// the latter (`alloc_page`/`page_bytes`).
fn open_pools(
    pool_suffix: &str,
    numa_nodes: usize,
    table_size: usize,
    dataset_size: usize,
) -> Result<(Vec<Arc<dyn PmPool>>, Vec<Arc<dyn PmPool>>)> {
    let mut index_pools: Vec<Arc<dyn PmPool>> = Vec::with_capacity(numa_nodes);
    let mut log_pools: Vec<Arc<dyn PmPool>> = Vec::with_capacity(numa_nodes);
    for node in 0..numa_nodes {
        let dir = PathBuf::from(format!("/mnt/pmem{node}"));
        let index_path = dir.join(format!("{pool_suffix}.index"));
        let log_path = dir.join(format!("{pool_suffix}.log"));
        let capacity_segments = (table_size / rdpma_index::K_NUM_SLOT).max(1);
        let capacity_bytes = dataset_size * rdpma_proto::PAGE_SIZE as usize;

        let index_pool = FilePool::open_index(&index_path, node, capacity_segments)
            .with_context(|| format!("opening index pool at {}", index_path.display()))?;
        let log_pool = FilePool::open_log(&log_path, node, capacity_bytes, rdpma_proto::PAGE_SIZE as usize)
            .with_context(|| format!("opening log pool at {}", log_path.display()))?;
        index_pools.push(Arc::new(index_pool));
        log_pools.push(Arc::new(log_pool));
    }
    Ok((index_pools, log_pools))
}

fn run_stats(pools: Vec<Arc<dyn PmPool>>) -> Result<()> {
    let index = Index::open(pools, SplitPolicy::Skewed)?;
    print!("{}", format_stats(&index));
    Ok(())
}

fn run_recover_only(pools: Vec<Arc<dyn PmPool>>) -> Result<()> {
    let index = Index::open(pools, SplitPolicy::Skewed)?;
    index.recover()?;
    tracing::info!(depth = index.depth(), capacity = index.capacity(), "recovery complete");
    Ok(())
}

/// Accept TCP bootstrap connections and register a loopback device pair
/// per client under its negotiated qid (spec §6: "one round-trip per
/// client QP"). Runs until the listener errors.
fn accept_connections(
    listener: TcpListener,
    transport: Arc<LoopbackServer>,
    connections: Arc<ConnectionTable<rdpma_transport::LoopbackDevice>>,
) {
    let mut next_qid: u8 = 0;
    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "bootstrap accept failed");
                continue;
            }
        };
        let qid = next_qid;
        next_qid = next_qid.wrapping_add(1);

        let local = bootstrap::BootstrapRecord {
            node_id: qid as u32,
            lid: 0,
            qpn: qid as u32,
            psn: 0,
            mm_base_addr: METADATA_BASE,
            rkey: 0,
            gid: [0u8; 16],
        };
        match bootstrap::exchange(&mut stream, &local) {
            Ok(peer) => {
                tracing::info!(qid, peer_node_id = peer.node_id, "bootstrap exchange complete");
                match qp::bring_up() {
                    Ok(state) => tracing::debug!(?state, qid, "queue pair brought up"),
                    Err(e) => {
                        tracing::error!(error = %e, qid, "queue pair bring-up failed");
                        continue;
                    }
                }
                let (server_side, _client_side) = transport.connect(DEVICE_MEM_SIZE);
                connections.register(qid, Arc::new(server_side));
            }
            Err(e) => tracing::warn!(error = %e, qid, "bootstrap exchange failed"),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Fixed at one NUMA node pending a `--numa-nodes`-style flag; spec §6
    // names per-node pool paths but leaves node count to deployment.
    let numa_nodes = 1usize;
    let (index_pools, log_pools) = match open_pools(&args.pool_suffix, numa_nodes, args.table_size, args.dataset_size) {
        Ok(pools) => pools,
        Err(e) => {
            tracing::warn!(error = %e, "falling back to heap-backed pools (no /mnt/pmemN mount available)");
            let heap: Vec<Arc<dyn PmPool>> = (0..numa_nodes)
                .map(|n| Arc::new(rdpma_index::HeapPool::new(n, rdpma_proto::PAGE_SIZE as usize)) as Arc<dyn PmPool>)
                .collect();
            (heap.clone(), heap)
        }
    };

    if let Some(cmd) = &args.command {
        return match cmd {
            Commands::Stats => run_stats(index_pools),
            Commands::RecoverOnly => run_recover_only(index_pools),
        };
    }

    let index = Arc::new(Index::open(index_pools, SplitPolicy::Skewed)?);
    let rql = Arc::new(RequestQueueLayer::new(numa_nodes));
    let staging = Arc::new(StagingPool::new(STAGING_BASE, STAGING_CHUNKS, 15));
    let transport = Arc::new(LoopbackServer::new(DEVICE_MEM_SIZE));
    let connections: Arc<ConnectionTable<rdpma_transport::LoopbackDevice>> = Arc::new(ConnectionTable::new());

    let listener = TcpListener::bind(("0.0.0.0", args.tcp_port)).context("binding bootstrap TCP listener")?;
    tracing::info!(port = args.tcp_port, "bootstrap listener up");

    {
        let transport = transport.clone();
        let connections = connections.clone();
        thread::spawn(move || accept_connections(listener, transport, connections));
    }

    {
        let net_cpus = args.net_mask.cpus();
        let connections = connections.clone();
        let index = index.clone();
        let rql = rql.clone();
        let transport = transport.clone();
        thread::spawn(move || {
            if let Some(&cpu) = net_cpus.first() {
                let _ = pin_current_thread(cpu);
            }
            // Any connected device handle observes the shared CQ; block
            // until the first connection lands, then poll forever.
            loop {
                let Some(device) = connections.get(0) else {
                    thread::yield_now();
                    continue;
                };
                let _ = &transport;
                let engine = ProtocolEngine::new(device, index.clone(), rql.clone(), METADATA_BASE);
                loop {
                    if engine.poll_once() == 0 {
                        thread::yield_now();
                    }
                }
            }
        });
    }

    let kv_cpus = {
        let cpus = args.kv_mask.cpus();
        if cpus.is_empty() {
            vec![0]
        } else {
            cpus
        }
    };
    let mut handles = Vec::with_capacity(kv_cpus.len());
    for (i, cpu) in kv_cpus.iter().copied().enumerate() {
        let node_id = i % numa_nodes;
        let ctx = WorkerContext {
            node_id,
            index: index.clone(),
            pool: log_pools[node_id].clone(),
            staging: staging.clone(),
            connections: connections.clone(),
            rql: rql.clone(),
            metadata_base: METADATA_BASE,
            page_base: PAGE_BASE,
            max_num_pages: 15,
        };
        handles.push(thread::spawn(move || {
            let _ = pin_current_thread(cpu);
            loop {
                if !ctx.run_once() {
                    thread::yield_now();
                }
            }
        }));
    }

    for h in handles {
        let _ = h.join();
    }
    Ok(())
}
