// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Client Submission Path (spec §2 CSP, §4.2–§4.3, §5–§6): per-CPU
//! queue selection, the blocking status-wait descriptor, the
//! background completion poller, and the `put`/`get`/`buffered_put`
//! API a page-eviction caller drives a connected queue pair through.
//!
//! This crate has no RDMA hardware dependency of its own; it is
//! generic over [`rdpma_transport::RdmaDevice`], so the full CSP is
//! exercisable in tests against [`rdpma_transport::LoopbackDevice`]
//! and, in `session`'s own test module, against an embedded
//! `rdpma-server` dispatch engine and worker pool.

pub mod config;
pub mod error;
pub mod poller;
pub mod qid;
pub mod session;
pub mod stats;
pub mod wait;

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use poller::{CompletionPoller, PollerHandle};
pub use qid::select_qid;
pub use session::{ClientSession, MAX_IN_FLIGHT_PER_SESSION};
pub use stats::SubmissionStats;
pub use wait::{Outcome, StatusWait};
