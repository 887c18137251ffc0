// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Memory-side dispatch engine (spec §2 PE, §4.8): a single receive
//! poller that steers requests across per-NUMA queues, and the
//! NUMA-pinned worker threads that drive `rdpma-index` on their
//! behalf.
//!
//! This crate has no RDMA hardware dependency of its own; it is
//! generic over [`rdpma_transport::RdmaDevice`], so `rdpma-server`'s
//! logic is fully exercisable in tests against
//! [`rdpma_transport::LoopbackDevice`].

pub mod config;
pub mod cpuset;
pub mod dispatch;
pub mod error;
pub mod staging;
pub mod stats;
pub mod worker;

pub use config::{Args, Commands, ServerConfig};
pub use cpuset::CpuMask;
pub use dispatch::{ConnectionTable, ProtocolEngine};
pub use error::{Result, ServerError};
pub use staging::StagingPool;
pub use worker::WorkerContext;
