// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wire protocol for the rdpma disaggregated memory pool.
//!
//! This crate has no RDMA or persistent-memory dependency of its own: it
//! only defines the bytes that cross the wire and the fixed addressing
//! scheme both peers use to find them. [`rdpma-transport`] builds RDMA
//! work requests around these types; [`rdpma-index`] and [`rdpma-server`]
//! consume the decoded [`control::ControlWord`] to drive the PUT/GET
//! handshakes in spec §4.2–4.3.

pub mod control;
pub mod error;
pub mod metadata;
pub mod types;

pub use control::{ControlWord, MessageKind, TxState, MAX_NUM_PAGES, NUM_ENTRY};
pub use error::{Error, Result};
pub use metadata::{MetadataSlot, METADATA_SIZE, PAGE_SIZE};
pub use types::{is_live, Key, Value, INVALID, SENTINEL};
