//! In-process [`RdmaDevice`] pair that actually moves bytes between two
//! "registered" memory regions, so the protocol engine and its PUT/GET
//! handshakes are exercisable end to end with no RDMA-capable NIC —
//! exactly the role spec §1's "external collaborator" framing leaves
//! for a concrete transport, filled here with a test double instead.

use crate::device::{Completion, CompletionStatus, RdmaDevice};
use crate::error::Result;
use crate::workrequest::{Opcode, WorkRequest};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

struct Endpoint {
    mem: Mutex<Vec<u8>>,
    send_cq: Mutex<VecDeque<Completion>>,
    recv_cq: Mutex<VecDeque<Completion>>,
    /// wr_ids of posted-but-not-yet-matched receive buffers, FIFO like
    /// a real QP's receive queue.
    pending_recv_wrs: Mutex<VecDeque<u64>>,
}

impl Endpoint {
    fn new(mem_size: usize) -> Self {
        Self {
            mem: Mutex::new(vec![0u8; mem_size]),
            send_cq: Mutex::new(VecDeque::new()),
            recv_cq: Mutex::new(VecDeque::new()),
            pending_recv_wrs: Mutex::new(VecDeque::new()),
        }
    }
}

/// One peer's handle onto a loopback-connected pair. `local` is this
/// peer's own registered memory (what `write_local`/`read_local` and a
/// work request's `local_addr` address); `remote` is the other peer's
/// memory (what a work request's `remote_addr` addresses).
pub struct LoopbackDevice {
    local: Arc<Endpoint>,
    remote: Arc<Endpoint>,
}

impl LoopbackDevice {
    /// Build a connected pair: `a`'s remote is `b`'s local and vice
    /// versa, mirroring two ends of one QP.
    pub fn pair(a_mem_size: usize, b_mem_size: usize) -> (LoopbackDevice, LoopbackDevice) {
        let a_end = Arc::new(Endpoint::new(a_mem_size));
        let b_end = Arc::new(Endpoint::new(b_mem_size));
        let a = LoopbackDevice {
            local: a_end.clone(),
            remote: b_end.clone(),
        };
        let b = LoopbackDevice {
            local: b_end,
            remote: a_end,
        };
        (a, b)
    }

    /// A second device sharing this one's `local` endpoint but with a
    /// fresh `remote` — models a second client QP landing on the same
    /// server-side registered MR, matching spec §4.1's single shared
    /// metadata base address indexed by `qid` and spec §5's single
    /// receive/send CQ shared across every QP.
    fn sibling_with_new_remote(&self, remote_mem_size: usize) -> LoopbackDevice {
        LoopbackDevice {
            local: self.local.clone(),
            remote: Arc::new(Endpoint::new(remote_mem_size)),
        }
    }

    fn post_one(&self, wr: &WorkRequest) {
        match wr.opcode {
            Opcode::RdmaWrite | Opcode::RdmaWriteWithImm(_) => {
                let src = self.local.mem.lock()[wr.local_addr as usize..(wr.local_addr + wr.length as u64) as usize].to_vec();
                self.remote.mem.lock()[wr.remote_addr as usize..(wr.remote_addr + wr.length as u64) as usize]
                    .copy_from_slice(&src);
            }
            Opcode::RdmaRead => {
                let src = self.remote.mem.lock()[wr.remote_addr as usize..(wr.remote_addr + wr.length as u64) as usize].to_vec();
                self.local.mem.lock()[wr.local_addr as usize..(wr.local_addr + wr.length as u64) as usize]
                    .copy_from_slice(&src);
            }
        }
        if wr.signaled {
            self.local.send_cq.lock().push_back(Completion {
                wr_id: wr.wr_id,
                status: CompletionStatus::Success,
                imm_data: None,
            });
        }
        if let Opcode::RdmaWriteWithImm(imm) = wr.opcode {
            let matched_wr_id = self.remote.pending_recv_wrs.lock().pop_front().unwrap_or(0);
            self.remote.recv_cq.lock().push_back(Completion {
                wr_id: matched_wr_id,
                status: CompletionStatus::Success,
                imm_data: Some(imm),
            });
        }
    }
}

impl RdmaDevice for LoopbackDevice {
    fn post_send(&self, wr: WorkRequest) -> Result<()> {
        for w in wr.flatten() {
            self.post_one(&w);
        }
        Ok(())
    }

    fn post_recv(&self, wr_id: u64, _addr: u64, _length: u32, _local_key: u32) -> Result<()> {
        self.local.pending_recv_wrs.lock().push_back(wr_id);
        Ok(())
    }

    fn poll_send_cq(&self, max: usize) -> Vec<Completion> {
        let mut cq = self.local.send_cq.lock();
        (0..max).filter_map(|_| cq.pop_front()).collect()
    }

    fn poll_recv_cq(&self, max: usize) -> Vec<Completion> {
        let mut cq = self.local.recv_cq.lock();
        (0..max).filter_map(|_| cq.pop_front()).collect()
    }

    fn write_local(&self, addr: u64, bytes: &[u8]) {
        self.local.mem.lock()[addr as usize..addr as usize + bytes.len()].copy_from_slice(bytes);
    }

    fn read_local(&self, addr: u64, len: usize) -> Vec<u8> {
        self.local.mem.lock()[addr as usize..addr as usize + len].to_vec()
    }
}

/// A server-side registered MR shared by every connected client QP
/// (spec §4.1: one base address, indexed by `qid`; spec §5: a single
/// receive-CQ poller and a single send-CQ "shared across outbound work
/// requests" for the whole server). [`LoopbackServer::connect`] hands
/// back a `(server_side, client_side)` device pair per client; every
/// `server_side` device drains the *same* underlying CQs.
pub struct LoopbackServer {
    local: Arc<Endpoint>,
}

impl LoopbackServer {
    pub fn new(mem_size: usize) -> Self {
        Self {
            local: Arc::new(Endpoint::new(mem_size)),
        }
    }

    /// Connect one more client, with its own `client_mem_size`-byte
    /// registered memory. Returns `(server_side_device, client_side_device)`.
    pub fn connect(&self, client_mem_size: usize) -> (LoopbackDevice, LoopbackDevice) {
        let client_end = Arc::new(Endpoint::new(client_mem_size));
        let server_side = LoopbackDevice {
            local: self.local.clone(),
            remote: client_end.clone(),
        };
        let client_side = LoopbackDevice {
            local: client_end,
            remote: self.local.clone(),
        };
        (server_side, client_side)
    }
}
