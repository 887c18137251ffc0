//! Fixed metadata slot layout shared by both peers (spec §4.1).
//!
//! Each `(qid, msg_num)` pair owns a `METADATA_SIZE`-byte region. The first
//! 8 bytes carry the key, the next 8 a DMA-able payload address, and a
//! further 8 the `num` page count. Both the GET destination-page address
//! and the PUT staging address travel in the same `addr` field depending
//! on direction.

use crate::control::NUM_ENTRY;

/// Bytes reserved per `(qid, msg_num)` metadata slot.
pub const METADATA_SIZE: u64 = 64;

/// Bytes per page payload; the PM page pool and the RDMA-registered
/// staging regions are both sliced in units of this size.
pub const PAGE_SIZE: u64 = 4096;

/// Byte offset of the metadata region belonging to `(qid, msg_num)`,
/// relative to the metadata region's base address.
///
/// Stride is implementation-defined by spec §4.1 as long as both peers
/// agree; this lays msg_num out as the fast-varying index within a qid's
/// block, matching the original's `bit_mask`/offset scheme where msg_num
/// selects a slot inside a queue's region.
pub fn metadata_slot_offset(qid: u8, msg_num: u16) -> u64 {
    debug_assert!((msg_num as u32) < NUM_ENTRY as u32);
    qid as u64 * NUM_ENTRY as u64 * METADATA_SIZE + msg_num as u64 * METADATA_SIZE
}

/// Byte offset of the page-payload region belonging to `(qid, msg_num)`.
pub fn page_slot_offset(qid: u8, msg_num: u16, max_num_pages: u64) -> u64 {
    debug_assert!((msg_num as u32) < NUM_ENTRY as u32);
    let slot_bytes = PAGE_SIZE * max_num_pages;
    qid as u64 * NUM_ENTRY as u64 * slot_bytes + msg_num as u64 * slot_bytes
}

/// In-memory view of one metadata slot's first 24 bytes (key, addr, num);
/// the remainder of the `METADATA_SIZE`-byte region is reserved padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetadataSlot {
    pub key: u64,
    pub addr: u64,
    pub num: u64,
}

impl MetadataSlot {
    pub const WIRE_SIZE: usize = 24;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..8].copy_from_slice(&self.key.to_ne_bytes());
        out[8..16].copy_from_slice(&self.addr.to_ne_bytes());
        out[16..24].copy_from_slice(&self.num.to_ne_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let key = u64::from_ne_bytes(bytes[0..8].try_into().unwrap());
        let addr = u64::from_ne_bytes(bytes[8..16].try_into().unwrap());
        let num = u64::from_ne_bytes(bytes[16..24].try_into().unwrap());
        Self { key, addr, num }
    }
}
