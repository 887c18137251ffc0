//! The RDMA device abstraction the protocol engine posts work against.
//!
//! Real connection setup (QP/CQ/PD creation, MR registration against a
//! specific NIC) is out of scope per spec §1 — the specific device is
//! "treated as an allocator"-equivalent collaborator. [`RdmaDevice`] is
//! the interface the rest of the workspace codes against; production
//! deployments would back it with an `ibverbs`-style binding, while
//! [`crate::loopback::LoopbackDevice`] backs it with plain memory for
//! tests.

use crate::error::Result;
use crate::workrequest::WorkRequest;

/// One completed work request, as drained off a CQ.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub wr_id: u64,
    pub status: CompletionStatus,
    /// Present on a receive completion whose work request carried
    /// `RDMA_WRITE_WITH_IMM` (spec §4.1); `None` otherwise.
    pub imm_data: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    Error,
}

/// A connected queue pair's send/receive surface. One `RdmaDevice`
/// instance models one peer's end of one QP: `post_send`/`post_recv`
/// enqueue work, `poll_send_cq`/`poll_recv_cq` drain completions (spec
/// §5: "the server uses a convention that only one in-flight signaled
/// send exists per QP per control exchange").
pub trait RdmaDevice: Send + Sync {
    /// Post `wr` and everything chained after it (spec §4.2: the page
    /// write and the metadata write-with-imm are one post_send call).
    fn post_send(&self, wr: WorkRequest) -> Result<()>;

    /// Post a receive buffer of `length` bytes at local `addr`, tagged
    /// `wr_id`; its completion (when a peer's `RDMA_WRITE_WITH_IMM`
    /// arrives) is reported with that `wr_id` on the receive CQ.
    fn post_recv(&self, wr_id: u64, addr: u64, length: u32, local_key: u32) -> Result<()>;

    fn poll_send_cq(&self, max: usize) -> Vec<Completion>;
    fn poll_recv_cq(&self, max: usize) -> Vec<Completion>;

    /// Write `bytes` into this device's own registered memory at
    /// `addr` — the local half of populating a work request's source
    /// buffer before posting it.
    fn write_local(&self, addr: u64, bytes: &[u8]);

    /// Read `len` bytes back out of this device's own registered memory.
    fn read_local(&self, addr: u64, len: usize) -> Vec<u8>;
}
