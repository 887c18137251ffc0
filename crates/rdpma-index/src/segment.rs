//! Segment: the persistent bucket array that is CCEH's leaf unit (spec §3).
//!
//! The original C packs a read/write counter, a sibling-side bit, and the
//! depth into one machine word (`local_depth`). Per the redesign note in
//! spec §9 we keep those as three independent fields: `local_depth` (a
//! plain depth integer), `sibling_side` (the forward-link selector bit),
//! and `sema` (the rw-lock counter), none of which alias each other's
//! bits.

use crate::hash::{f_hash, s_hash};
use crate::pm::{PmPool, SegmentId, NULL_SEGMENT};
use rdpma_proto::{is_live, Key, Value, INVALID, SENTINEL};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

/// Pairs per cache line.
pub const K_NUM_PAIR_PER_CACHE_LINE: usize = 4;
/// Cache lines per associativity group.
pub const K_NUM_CACHE_LINE: usize = 4;
/// Associativity multiplier ("N" in spec §3's `kNumSlot` invariant).
pub const ASSOC_MULTIPLIER: usize = 2;
/// Total slots per segment: `kNumPairPerCacheLine * kNumCacheLine * N`.
pub const K_NUM_SLOT: usize = K_NUM_PAIR_PER_CACHE_LINE * K_NUM_CACHE_LINE * ASSOC_MULTIPLIER;
/// Slots scanned per probe (spec §3/§8 property 6): `kNumPairPerCacheLine *
/// kNumCacheLine`, half of `K_NUM_SLOT` under `ASSOC_MULTIPLIER = 2`. A
/// single probe (f- or s-hash) reads at most this many slots; `get` reads
/// at most `2 * K_PROBE_WINDOW` across both.
pub const K_PROBE_WINDOW: usize = K_NUM_PAIR_PER_CACHE_LINE * K_NUM_CACHE_LINE;
/// Number of probe-window groups a hash's low bits select among.
const K_NUM_GROUPS: u64 = (K_NUM_CACHE_LINE * ASSOC_MULTIPLIER) as u64;
const K_MASK: u64 = K_NUM_GROUPS - 1;
/// Bound on cuckoo path length before `find_path` gives up.
pub const K_CUCKOO_THRESHOLD: usize = 8;

const KEY_BITS: u32 = 64;

/// One key/value slot. `key` is the commit point: a reader that observes
/// a live `key` is guaranteed to see the `value` written immediately
/// before it, because inserts fence between the two writes (spec §3,
/// §5).
#[derive(Debug)]
#[repr(C)]
pub struct Pair {
    pub key: AtomicU64,
    pub value: AtomicU64,
}

impl Default for Pair {
    fn default() -> Self {
        Self {
            key: AtomicU64::new(INVALID),
            value: AtomicU64::new(0),
        }
    }
}

impl Pair {
    fn snapshot(&self) -> (Key, Value) {
        (self.key.load(Ordering::Acquire), self.value.load(Ordering::Acquire))
    }
}

/// Top `depth` bits of `hash`, used as both a segment selector (via the
/// directory) and a per-slot validity pattern.
#[inline]
pub fn pattern(hash: u64, depth: u32) -> u64 {
    if depth == 0 {
        0
    } else {
        hash >> (KEY_BITS - depth)
    }
}

/// Probe window start for `hash`: `(hash & kMask) * kNumPairPerCacheLine`.
#[inline]
pub fn probe_start(hash: u64) -> usize {
    ((hash & K_MASK) * K_NUM_PAIR_PER_CACHE_LINE as u64) as usize
}

/// A persistent bucket array plus the volatile rw-lock and sibling
/// bookkeeping layered over it.
#[repr(align(64))]
pub struct Segment {
    pub id: SegmentId,
    pub bucket: [Pair; K_NUM_SLOT],
    local_depth: AtomicU32,
    /// Which `sibling[]` slot currently holds the forward link, for the
    /// Recovery sibling-chain traversal (spec §4.7).
    sibling_side: AtomicBool,
    sibling: [AtomicU64; 2],
    /// Negative = held exclusively; >= 0 = shared-lock count.
    sema: AtomicI64,
}

impl Segment {
    pub fn new(id: SegmentId, local_depth: u32) -> Self {
        Self {
            id,
            bucket: std::array::from_fn(|_| Pair::default()),
            local_depth: AtomicU32::new(local_depth),
            sibling_side: AtomicBool::new(false),
            sibling: [AtomicU64::new(NULL_SEGMENT), AtomicU64::new(NULL_SEGMENT)],
            sema: AtomicI64::new(0),
        }
    }

    #[inline]
    pub fn local_depth(&self) -> u32 {
        self.local_depth.load(Ordering::Acquire)
    }

    /// Bump the depth and flip the sibling-side bit, matching the
    /// original's toggling high bit: each split alternates which
    /// `sibling[]` slot Recovery should follow forward.
    pub fn bump_depth_after_split(&self, new_sibling: SegmentId) {
        let side = self.sibling_side.load(Ordering::Acquire);
        let next_side = !side;
        self.sibling[next_side as usize].store(new_sibling, Ordering::Release);
        self.sibling_side.store(next_side, Ordering::Release);
        self.local_depth.fetch_add(1, Ordering::AcqRel);
    }

    pub fn forward_sibling(&self) -> Option<SegmentId> {
        let side = self.sibling_side.load(Ordering::Acquire) as usize;
        match self.sibling[side].load(Ordering::Acquire) {
            NULL_SEGMENT => None,
            id => Some(id),
        }
    }

    // -- rw-lock -----------------------------------------------------

    pub fn try_lock_shared(&self) -> bool {
        loop {
            let s = self.sema.load(Ordering::Acquire);
            if s < 0 {
                return false;
            }
            if self
                .sema
                .compare_exchange_weak(s, s + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn unlock_shared(&self) {
        self.sema.fetch_sub(1, Ordering::Release);
    }

    /// Acquire exclusive access; callers must hold no shared lock on
    /// this segment already (release it first, per spec §4.4 step 6, to
    /// avoid deadlocking against other inserters).
    pub fn try_lock_exclusive(&self) -> bool {
        self.sema.compare_exchange(0, -1, Ordering::AcqRel, Ordering::Relaxed).is_ok()
    }

    pub fn unlock_exclusive(&self) {
        self.sema.store(0, Ordering::Release);
    }

    // -- probing -------------------------------------------------------

    /// True if the slot's current key belongs to this segment under
    /// `depth`/`expected_pattern` — i.e. it is neither empty nor stale
    /// after a split.
    fn slot_is_claimable(&self, slot: usize, depth: u32, expected_pattern: u64) -> bool {
        let key = self.bucket[slot].key.load(Ordering::Acquire);
        if key == SENTINEL {
            return false;
        }
        key == INVALID || pattern(f_hash(key), depth) != expected_pattern
    }

    /// Dual-hash probe-and-claim used by [`crate::index::Index::insert`]:
    /// try every slot in the window starting at `start`; CAS the first
    /// claimable slot to `SENTINEL`, then publish `value` then `key`
    /// (value-first, fence, key-last — spec §3).
    pub fn probe_and_claim(
        &self,
        pool: &dyn PmPool,
        start: usize,
        depth: u32,
        expected_pattern: u64,
        key: Key,
        value: Value,
    ) -> bool {
        for i in 0..K_PROBE_WINDOW {
            let slot = (start + i) % K_NUM_SLOT;
            if !self.slot_is_claimable(slot, depth, expected_pattern) {
                continue;
            }
            let cur = self.bucket[slot].key.load(Ordering::Acquire);
            if self.bucket[slot]
                .key
                .compare_exchange(cur, SENTINEL, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }
            self.bucket[slot].value.store(value, Ordering::Relaxed);
            std::sync::atomic::fence(Ordering::SeqCst);
            self.bucket[slot].key.store(key, Ordering::Release);
            crate::pm::flush_value(pool, &self.bucket[slot]);
            return true;
        }
        false
    }

    /// Scan both probe windows for `key`; returns the first match's
    /// value. Used by Get (spec §4.5) and by cuckoo's reverse lookups.
    pub fn scan(&self, f_start: usize, s_start: usize, key: Key) -> Option<Value> {
        for i in 0..K_PROBE_WINDOW {
            let slot = (f_start + i) % K_NUM_SLOT;
            let (k, v) = self.bucket[slot].snapshot();
            if k == key {
                return Some(v);
            }
        }
        for i in 0..K_PROBE_WINDOW {
            let slot = (s_start + i) % K_NUM_SLOT;
            let (k, v) = self.bucket[slot].snapshot();
            if k == key {
                return Some(v);
            }
        }
        None
    }

    /// Plain (non-CAS) placement used while redistributing into a
    /// freshly allocated, not-yet-published segment during a split
    /// (spec §4.4 step 7) — single-writer, no concurrent claimants.
    pub fn insert_for_split(&self, key: Key, value: Value, loc: usize) -> bool {
        for i in 0..K_PROBE_WINDOW {
            let slot = (loc + i) % K_NUM_SLOT;
            if self.bucket[slot].key.load(Ordering::Relaxed) == INVALID {
                self.bucket[slot].key.store(key, Ordering::Relaxed);
                self.bucket[slot].value.store(value, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    /// Build a cuckoo displacement chain starting at `target`: the
    /// sequence of slots whose occupant can be pushed to its *other*
    /// hash's window, stopping at a slot whose key no longer belongs to
    /// this segment (the split/empty equivalent). Returns `None` if no
    /// such chain is found within `K_CUCKOO_THRESHOLD` steps, or if the
    /// starting slot's key has already drifted out of pattern.
    pub fn find_path(&self, target: usize, depth: u32, expected_pattern: u64) -> Option<Vec<usize>> {
        let mut path = Vec::with_capacity(K_CUCKOO_THRESHOLD);
        path.push(target);
        let mut cur = target;

        for _ in 0..K_CUCKOO_THRESHOLD {
            let key = self.bucket[cur].key.load(Ordering::Acquire);
            if key == INVALID || key == SENTINEL || pattern(f_hash(key), depth) != expected_pattern {
                break;
            }
            let f = probe_start(f_hash(key));
            let s = probe_start(s_hash(key));
            let mut advanced = false;
            for j in 0..K_PROBE_WINDOW {
                let f_idx = (f + j) % K_NUM_SLOT;
                let s_idx = (s + j) % K_NUM_SLOT;
                if f_idx == cur {
                    path.push(s_idx);
                    cur = s_idx;
                    advanced = true;
                    break;
                }
                if s_idx == cur {
                    path.push(f_idx);
                    cur = f_idx;
                    advanced = true;
                    break;
                }
            }
            if !advanced {
                break;
            }
            // A slot outside our own segment's live pattern is the
            // "empty equivalent" find_path is looking for: stop here,
            // the chain is usable.
            let next_key = self.bucket[cur].key.load(Ordering::Acquire);
            if next_key == INVALID
                || next_key == SENTINEL
                || pattern(f_hash(next_key), depth) != expected_pattern
            {
                return Some(path);
            }
        }
        None
    }

    /// Shift pairs along `path` in reverse, then write `(key, value)` at
    /// the head. When `pool` is `Some`, each shifted slot — and the new
    /// head — is persisted immediately (live cuckoo resolution, spec
    /// §4.4 step 6). When `None`, no persistence happens per step: the
    /// caller (split redistribution) persists the whole segment once,
    /// after all redistribution completes.
    pub fn execute_path(&self, pool: Option<&dyn PmPool>, path: &[usize], key: Key, value: Value) {
        for i in (1..path.len()).rev() {
            let (k, v) = self.bucket[path[i - 1]].snapshot();
            self.bucket[path[i]].value.store(v, Ordering::Relaxed);
            self.bucket[path[i]].key.store(k, Ordering::Relaxed);
            if let Some(pool) = pool {
                crate::pm::flush_value(pool, &self.bucket[path[i]]);
            }
        }
        let head = path[0];
        self.bucket[head].value.store(value, Ordering::Relaxed);
        std::sync::atomic::fence(Ordering::SeqCst);
        self.bucket[head].key.store(key, Ordering::Release);
        if let Some(pool) = pool {
            crate::pm::flush_value(pool, &self.bucket[head]);
        }
    }

    #[cfg(test)]
    pub fn find_anyway(&self, key: Key) -> Option<Value> {
        self.bucket
            .iter()
            .find(|p| p.key.load(Ordering::Acquire) == key)
            .map(|p| p.value.load(Ordering::Acquire))
    }

    /// Fraction of slots holding a key that belongs to this segment
    /// under `depth`/`expected_pattern` — used by [`crate::index::Index::utilization`].
    pub fn live_count(&self, depth: u32, expected_pattern: u64) -> usize {
        self.bucket
            .iter()
            .filter(|p| {
                let k = p.key.load(Ordering::Acquire);
                is_live(k) && pattern(f_hash(k), depth) == expected_pattern
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pm::HeapPool;

    #[test]
    fn probe_and_claim_then_scan_finds_value() {
        let pool = HeapPool::new(0, 4096);
        let seg = Segment::new(0, 0);
        let key = 7u64;
        let f = probe_start(f_hash(key));
        let s = probe_start(s_hash(key));
        assert!(seg.probe_and_claim(&pool, f, 0, 0, key, 99));
        assert_eq!(seg.scan(f, s, key), Some(99));
    }

    #[test]
    fn insert_for_split_is_single_writer_no_cas() {
        let seg = Segment::new(0, 1);
        assert!(seg.insert_for_split(5, 50, 0));
        assert_eq!(seg.find_anyway(5), Some(50));
    }

    #[test]
    fn bump_depth_after_split_toggles_forward_sibling() {
        let seg = Segment::new(0, 2);
        assert_eq!(seg.forward_sibling(), None);
        seg.bump_depth_after_split(11);
        assert_eq!(seg.forward_sibling(), Some(11));
        assert_eq!(seg.local_depth(), 3);
        seg.bump_depth_after_split(12);
        assert_eq!(seg.forward_sibling(), Some(12));
        assert_eq!(seg.local_depth(), 4);
    }

    #[test]
    fn exclusive_lock_excludes_shared() {
        let seg = Segment::new(0, 0);
        assert!(seg.try_lock_shared());
        assert!(!seg.try_lock_exclusive());
        seg.unlock_shared();
        assert!(seg.try_lock_exclusive());
        assert!(!seg.try_lock_shared());
        seg.unlock_exclusive();
    }
}
