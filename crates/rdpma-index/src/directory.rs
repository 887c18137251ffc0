//! The volatile directory above PSS (spec §3, §4.4's doubling path).

use crate::pm::SegmentId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// Fan-out table of pointers to segments, indexed by the top `depth`
/// bits of a key's f_hash.
pub struct Directory {
    depth: AtomicU32,
    table: RwLock<Vec<SegmentId>>,
    /// Negative while a doubling is in progress; Get busy-waits for this
    /// to return non-negative before resolving a segment (spec §5).
    sema: AtomicI64,
}

impl Directory {
    pub fn new(depth: u32, fill: SegmentId) -> Self {
        Self {
            depth: AtomicU32::new(depth),
            table: RwLock::new(vec![fill; 1usize << depth]),
            sema: AtomicI64::new(0),
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        1usize << self.depth()
    }

    pub fn segment_at(&self, idx: usize) -> SegmentId {
        self.table.read()[idx]
    }

    /// Busy-wait until no doubling is in progress (spec §4.5 step 1).
    pub fn wait_quiescent(&self) {
        while self.sema.load(Ordering::Acquire) < 0 {
            std::hint::spin_loop();
        }
    }

    pub fn try_lock_exclusive(&self) -> bool {
        self.sema.compare_exchange(0, -1, Ordering::AcqRel, Ordering::Relaxed).is_ok()
    }

    pub fn unlock_exclusive(&self) {
        self.sema.store(0, Ordering::Release);
    }

    /// Normal (non-doubling) split: patch `stride` consecutive entries
    /// starting at `block_start` so the upper half points at
    /// `new_segment`. Caller holds the exclusive lock.
    pub fn patch_block(&self, block_start: usize, stride: usize, new_segment: SegmentId) {
        let mut t = self.table.write();
        for slot in t.iter_mut().skip(block_start + stride / 2).take(stride / 2) {
            *slot = new_segment;
        }
    }

    /// Double capacity: `global_depth += 1`, every existing pointer is
    /// duplicated into two consecutive slots, except at `split_index`
    /// where the two halves of the just-split segment are installed.
    /// Caller holds the exclusive lock.
    pub fn double(&self, split_index: usize, halves: [SegmentId; 2]) {
        let mut t = self.table.write();
        let old_capacity = t.len();
        let mut doubled = Vec::with_capacity(old_capacity * 2);
        for (i, &seg) in t.iter().enumerate() {
            if i == split_index {
                doubled.push(halves[0]);
                doubled.push(halves[1]);
            } else {
                doubled.push(seg);
                doubled.push(seg);
            }
        }
        *t = doubled;
        self.depth.fetch_add(1, Ordering::AcqRel);
    }

    /// Snapshot of every distinct segment id, in ascending directory
    /// order — used by [`crate::index::Index::segment_loads`] style
    /// diagnostics and by tests checking block length invariants.
    pub fn snapshot(&self) -> Vec<SegmentId> {
        self.table.read().clone()
    }

    /// Wholesale replace depth and table, used by
    /// [`crate::index::Index::recover`] once the sibling chain has been
    /// walked and every segment's slot range recomputed from scratch.
    pub fn replace(&self, depth: u32, table: Vec<SegmentId>) {
        debug_assert_eq!(table.len(), 1usize << depth);
        *self.table.write() = table;
        self.depth.store(depth, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_directory_fills_every_slot() {
        let dir = Directory::new(2, 7);
        assert_eq!(dir.capacity(), 4);
        assert!((0..4).all(|i| dir.segment_at(i) == 7));
    }

    #[test]
    fn double_duplicates_pointers_except_split_index() {
        let dir = Directory::new(1, 0);
        dir.patch_block(0, 2, 1); // slots: [0,1]
        assert_eq!(dir.snapshot(), vec![0, 1]);
        dir.double(1, [1, 2]);
        assert_eq!(dir.depth(), 2);
        assert_eq!(dir.snapshot(), vec![0, 0, 1, 2]);
    }

    #[test]
    fn exclusive_lock_excludes_itself() {
        let dir = Directory::new(0, 0);
        assert!(dir.try_lock_exclusive());
        assert!(!dir.try_lock_exclusive());
        dir.unlock_exclusive();
        assert!(dir.try_lock_exclusive());
    }
}
