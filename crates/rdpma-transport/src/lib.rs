// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RDMA Transport Shim (spec §2 RTS): connection setup artifacts
//! modeled as an [`RdmaDevice`] trait, work-request construction, and
//! the TCP bootstrap handshake. [`loopback::LoopbackDevice`] is a
//! fully in-process implementation used to exercise the protocol
//! engine without a real RDMA-capable NIC.

pub mod bootstrap;
pub mod device;
pub mod error;
pub mod loopback;
pub mod qp;
pub mod workrequest;

pub use bootstrap::{exchange, BootstrapRecord};
pub use device::{Completion, CompletionStatus, RdmaDevice};
pub use error::{Result, TransportError};
pub use loopback::{LoopbackDevice, LoopbackServer};
pub use qp::{bring_up, transition, QpParams, QpState, CM_TIMEOUT};
pub use workrequest::{Opcode, WorkRequest};
