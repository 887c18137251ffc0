// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Request Queue Layer: lock-free per-NUMA-node request queues (spec
//! §2, §4.8) plus the bounded id-slot map shared by the client's
//! status-wait descriptors and the server's request descriptors (spec
//! §3).

pub mod descriptor;
pub mod error;
pub mod idmap;
pub mod rql;

pub use descriptor::{Direction, RequestDescriptor};
pub use error::{QueueError, Result};
pub use idmap::IdSlotMap;
pub use rql::{RequestQueueLayer, DEFAULT_QUEUE_CAPACITY};
