//! Transient staging buffer allocator (spec §4.8: "allocate transient
//! staging of `num * PAGE_SIZE` via the general allocator").
//!
//! The staging area lives in the device's registered memory, outside
//! the fixed metadata/page-slot regions, so a client can `RDMA_WRITE`
//! page bytes into it before the authoritative persistent-memory copy
//! happens. It is carved into fixed-size chunks and handed out from a
//! free list; "the general allocator" in spec prose is this free list.

use parking_lot::Mutex;
use rdpma_proto::PAGE_SIZE;
use std::collections::{HashMap, VecDeque};

/// Key identifying one in-flight WRITE_REQUEST/WRITE pairing.
pub type SlotKey = (u8, u16);

#[derive(Debug)]
pub enum StagingError {
    /// No free chunk; the caller aborts the request per spec §7
    /// ("allocation failure is fatal").
    Exhausted,
}

/// Fixed-chunk staging arena. `chunk_size` is `max_num_pages * PAGE_SIZE`
/// so any request up to the multi-page cap (spec §9: 15 pages) fits one
/// chunk.
pub struct StagingPool {
    base: u64,
    chunk_size: u64,
    free: Mutex<VecDeque<u64>>,
    reserved: Mutex<HashMap<SlotKey, u64>>,
}

impl StagingPool {
    pub fn new(base: u64, num_chunks: usize, max_num_pages: u64) -> Self {
        let chunk_size = max_num_pages * PAGE_SIZE;
        let free = (0..num_chunks as u64).map(|i| base + i * chunk_size).collect();
        Self {
            base,
            chunk_size,
            free: Mutex::new(free),
            reserved: Mutex::new(HashMap::new()),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Reserve a chunk for `key` and return its base address.
    pub fn reserve(&self, key: SlotKey) -> Result<u64, StagingError> {
        let addr = self.free.lock().pop_front().ok_or(StagingError::Exhausted)?;
        self.reserved.lock().insert(key, addr);
        Ok(addr)
    }

    /// Look up (without freeing) the chunk reserved for `key`.
    pub fn lookup(&self, key: SlotKey) -> Option<u64> {
        self.reserved.lock().get(&key).copied()
    }

    /// Remove `key`'s reservation and return its chunk to the free
    /// list (spec §4.8: "staging is freed when READ_REPLY arrives" /
    /// "free staging" after WRITE commits).
    pub fn release(&self, key: SlotKey) {
        if let Some(addr) = self.reserved.lock().remove(&key) {
            self.free.lock().push_back(addr);
        }
    }

    pub fn free_chunks(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_release_returns_chunk_to_free_list() {
        let pool = StagingPool::new(0x1000, 2, 1);
        let before = pool.free_chunks();
        let addr = pool.reserve((1, 2)).unwrap();
        assert_eq!(pool.free_chunks(), before - 1);
        assert_eq!(pool.lookup((1, 2)), Some(addr));
        pool.release((1, 2));
        assert_eq!(pool.free_chunks(), before);
        assert_eq!(pool.lookup((1, 2)), None);
    }

    #[test]
    fn exhausting_the_pool_is_reported() {
        let pool = StagingPool::new(0, 1, 1);
        pool.reserve((0, 0)).unwrap();
        assert!(matches!(pool.reserve((0, 1)), Err(StagingError::Exhausted)));
    }

    #[test]
    fn chunks_are_disjoint() {
        let pool = StagingPool::new(0, 4, 2);
        let a = pool.reserve((0, 0)).unwrap();
        let b = pool.reserve((0, 1)).unwrap();
        assert_ne!(a, b);
        assert!((b as i64 - a as i64).unsigned_abs() >= pool.chunk_size());
    }
}
