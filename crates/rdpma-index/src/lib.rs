// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Concurrent extendible-hash index (CCEH) on persistent memory (spec
//! §2 PSS+DSC+IDX, §4.4–§4.7): segments, directory doubling, dual-hash
//! probing, cuckoo displacement, NUMA-aware split placement, and
//! Recovery — composed behind the single [`Index`] entry point.

pub mod directory;
pub mod error;
pub mod hash;
pub mod index;
pub mod pm;
pub mod policy;
pub mod segment;

pub use error::{IndexError, Result};
pub use index::Index;
pub use pm::{encode_segment_id, flush_value, segment_local, segment_node, FilePool, HeapPool, PmPool, SegmentId, NULL_SEGMENT};
pub use policy::SplitPolicy;
pub use segment::{Pair, Segment, K_CUCKOO_THRESHOLD, K_NUM_SLOT, K_PROBE_WINDOW};
