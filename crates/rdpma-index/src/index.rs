//! The public entry point tying hashing, segments, the directory, and
//! split placement together into CCEH's three operations (spec §4.4,
//! §4.5, §4.7): Insert, Get, and Recovery.

use crate::directory::Directory;
use crate::error::{IndexError, Result};
use crate::hash::{f_hash, s_hash};
use crate::pm::{encode_segment_id, flush_value, segment_local, segment_node, PmPool, SegmentId, NULL_SEGMENT};
use crate::policy::{PlacementState, SplitPolicy};
use crate::segment::{pattern, probe_start, Segment, K_NUM_SLOT};
use rdpma_proto::{is_live, Key, Value, INVALID};
use std::sync::Arc;
use tracing::{debug, warn};

/// Depth the directory starts at before any split has happened.
const INITIAL_DEPTH: u32 = 0;
const KEY_BITS: u32 = 64;

/// A CCEH instance spanning one [`PmPool`] per NUMA node. Segments are
/// placed across nodes by a [`SplitPolicy`]; the directory that indexes
/// them is a single structure shared by every node, matching the
/// original's design of one logical hash table whose segments happen to
/// live in different persistent-memory pools.
pub struct Index {
    pools: Vec<Arc<dyn PmPool>>,
    dir: Directory,
    placement: PlacementState,
    policy: SplitPolicy,
    root: SegmentId,
}

impl Index {
    /// Open an index over `pools` (one entry per NUMA node, in node-id
    /// order). If `pools[0]` has no persisted root, this initializes a
    /// fresh, single-segment table on node 0; otherwise it recovers the
    /// directory from the on-disk sibling chain (spec §4.7).
    pub fn open(pools: Vec<Arc<dyn PmPool>>, policy: SplitPolicy) -> Result<Self> {
        assert!(!pools.is_empty(), "an index needs at least one NUMA-node pool");
        let placement = PlacementState::new(pools.len());
        let root = match pools[0].root() {
            Some(local) => encode_segment_id(0, local),
            None => {
                let local = pools[0].alloc_segment(INITIAL_DEPTH)?;
                pools[0].set_root(local);
                placement.choose(policy, 0);
                encode_segment_id(0, local)
            }
        };
        let dir = Directory::new(INITIAL_DEPTH, root);
        let index = Self { pools, dir, placement, policy, root };
        index.recover()?;
        Ok(index)
    }

    fn pool(&self, node: usize) -> &dyn PmPool {
        self.pools[node].as_ref()
    }

    fn segment(&self, id: SegmentId) -> &Segment {
        self.pool(segment_node(id)).segment(segment_local(id))
    }

    fn dir_index(&self, fh: u64) -> usize {
        pattern(fh, self.dir.depth()) as usize
    }

    // -- Insert ----------------------------------------------------------

    /// Insert `key` with `value`, splitting and growing the directory as
    /// needed (spec §4.4). Retries from the top whenever a concurrent
    /// split invalidates the segment this thread resolved.
    pub fn insert(&self, key: Key, value: Value) -> Result<()> {
        loop {
            self.dir.wait_quiescent();
            let fh = f_hash(key);
            let sh = s_hash(key);
            let idx = self.dir_index(fh);
            let seg_id = self.dir.segment_at(idx);
            let seg = self.segment(seg_id);

            if !seg.try_lock_shared() {
                continue;
            }
            if self.segment_still_current(seg_id, fh).is_none() {
                seg.unlock_shared();
                continue;
            }

            let local_depth = seg.local_depth();
            let expected = pattern(fh, local_depth);
            let f_start = probe_start(fh);
            let s_start = probe_start(sh);
            let pool = self.pool(segment_node(seg_id));

            if seg.probe_and_claim(pool, f_start, local_depth, expected, key, value)
                || seg.probe_and_claim(pool, s_start, local_depth, expected, key, value)
            {
                seg.unlock_shared();
                self.placement.record_insert(segment_node(seg_id));
                return Ok(());
            }
            seg.unlock_shared();

            // Both windows are full under the shared lock: upgrade to
            // exclusive to try cuckoo displacement, then split.
            if !seg.try_lock_exclusive() {
                continue;
            }
            let idx_now = match self.segment_still_current(seg_id, fh) {
                Some(idx_now) => idx_now,
                None => {
                    seg.unlock_exclusive();
                    continue;
                }
            };
            // Re-read: another insert may have split this very segment
            // between our shared unlock and this exclusive lock.
            let local_depth = seg.local_depth();
            let expected = pattern(fh, local_depth);

            if let Some(path) = seg.find_path(f_start, local_depth, expected).or_else(|| {
                seg.find_path(s_start, local_depth, expected)
            }) {
                seg.execute_path(Some(pool), &path, key, value);
                seg.unlock_exclusive();
                self.placement.record_insert(segment_node(seg_id));
                return Ok(());
            }

            debug!(seg_id, local_depth, "segment full and cuckoo exhausted, splitting");
            self.split(seg_id, idx_now)?;
            seg.unlock_exclusive();
            // retry the whole insert against the (now different) directory
        }
    }

    /// If `key`'s hash still resolves to `seg_id` under the directory's
    /// *current* depth, returns the (possibly more refined) index that
    /// proves it — i.e. no concurrent split replaced `seg_id` while this
    /// thread was acquiring its lock. Returns `None` otherwise.
    fn segment_still_current(&self, seg_id: SegmentId, fh: u64) -> Option<usize> {
        let idx = self.dir_index(fh);
        (self.dir.segment_at(idx) == seg_id).then_some(idx)
    }

    /// Split segment `old_id`, which the directory currently reaches via
    /// index `idx` (spec §4.4 step 7). Grows the directory (doubling) if
    /// the segment's local depth has caught up with the global depth,
    /// otherwise patches the block of entries that shared it.
    fn split(&self, old_id: SegmentId, idx: usize) -> Result<()> {
        loop {
            if self.dir.try_lock_exclusive() {
                break;
            }
            std::hint::spin_loop();
        }
        let result = self.split_locked(old_id, idx);
        self.dir.unlock_exclusive();
        result
    }

    fn split_locked(&self, old_id: SegmentId, idx: usize) -> Result<()> {
        let old = self.segment(old_id);
        let local_depth = old.local_depth();
        let global_depth = self.dir.depth();
        let current_node = segment_node(old_id);

        let new_node = self.placement.choose(self.policy, current_node);
        let new_local_depth = local_depth + 1;
        let new_local = self.pools[new_node].alloc_segment(new_local_depth)?;
        let new_id = encode_segment_id(new_node, new_local);
        let new_seg = self.pools[new_node].segment(new_local);

        // The segment's own (local_depth)-bit prefix, recovered from the
        // directory index that led us here; live keys split on the next
        // significant bit, 0 staying put and 1 moving to `new_seg`.
        let old_prefix = (idx as u64) >> (global_depth - local_depth);
        let new_pattern = (old_prefix << 1) | 1;

        for pair in old.bucket.iter() {
            let key = pair.key.load(std::sync::atomic::Ordering::Acquire);
            if !is_live(key) {
                continue;
            }
            if pattern(f_hash(key), new_local_depth) != new_pattern {
                continue;
            }
            let value = pair.value.load(std::sync::atomic::Ordering::Acquire);
            if !Self::place_in_fresh_segment(new_seg, key, value, new_local_depth, new_pattern) {
                panic!(
                    "split redistribution exhausted segment {new_id} for key {key}: \
                     both probe windows and cuckoo displacement failed"
                );
            }
            pair.key.store(INVALID, std::sync::atomic::Ordering::Relaxed);
        }

        flush_value(self.pool(new_node), new_seg);
        flush_value(self.pool(current_node), old);

        old.bump_depth_after_split(new_id);

        if global_depth == local_depth {
            self.dir.double(idx, [old_id, new_id]);
        } else {
            let stride = 1usize << (global_depth - local_depth);
            let block_start = idx - (idx % stride);
            self.dir.patch_block(block_start, stride, new_id);
        }
        Ok(())
    }

    /// Single-writer placement into a freshly allocated segment during a
    /// split: no CAS needed since nothing else can see `seg` yet.
    fn place_in_fresh_segment(seg: &Segment, key: Key, value: Value, depth: u32, expected: u64) -> bool {
        let f_start = probe_start(f_hash(key));
        let s_start = probe_start(s_hash(key));
        if seg.insert_for_split(key, value, f_start) || seg.insert_for_split(key, value, s_start) {
            return true;
        }
        if let Some(path) = seg.find_path(f_start, depth, expected).or_else(|| seg.find_path(s_start, depth, expected)) {
            seg.execute_path(None, &path, key, value);
            return true;
        }
        false
    }

    // -- Get ---------------------------------------------------------------

    /// Look up `key` (spec §4.5). Busy-waits out any in-progress
    /// directory doubling before resolving a segment.
    pub fn get(&self, key: Key) -> Option<Value> {
        loop {
            self.dir.wait_quiescent();
            let fh = f_hash(key);
            let sh = s_hash(key);
            let idx = self.dir_index(fh);
            let seg_id = self.dir.segment_at(idx);
            let seg = self.segment(seg_id);

            if !seg.try_lock_shared() {
                continue;
            }
            let f_start = probe_start(fh);
            let s_start = probe_start(sh);
            let found = seg.scan(f_start, s_start, key);
            seg.unlock_shared();
            return found;
        }
    }

    /// NUMA node `key` currently resolves to, without reading its value;
    /// used by the server dispatch engine to steer a request (spec
    /// §4.8).
    pub fn get_node_id(&self, key: Key) -> usize {
        self.dir.wait_quiescent();
        let idx = self.dir_index(f_hash(key));
        segment_node(self.dir.segment_at(idx))
    }

    // -- Recovery ------------------------------------------------------

    /// Rebuild the directory from the on-disk sibling chain (spec §4.7):
    /// walk forward from the root segment, recording each segment's
    /// (id, local_depth), then recover each segment's own address-space
    /// slice from any one of its live keys (every live key in a segment
    /// shares the same `pattern(key, local_depth)` by construction) and
    /// fan it out across the rebuilt directory.
    pub fn recover(&self) -> Result<()> {
        let mut chain = Vec::new();
        let mut cur = Some(self.root);
        let mut guard = 0usize;
        while let Some(id) = cur {
            let seg = self.segment(id);
            chain.push((id, seg));
            cur = seg.forward_sibling();
            guard += 1;
            if guard > 1_000_000 {
                return Err(IndexError::CorruptChain("sibling chain did not terminate".into()));
            }
        }
        if chain.is_empty() {
            return Err(IndexError::EmptyRoot);
        }

        let dir_depth = chain.iter().map(|(_, seg)| seg.local_depth()).max().unwrap();
        let mut table = vec![NULL_SEGMENT; 1usize << dir_depth];
        let mut node_counts = vec![0u64; self.pools.len()];

        for (id, seg) in &chain {
            let local_depth = seg.local_depth();
            let seg_prefix = match Self::any_live_key(seg) {
                Some(key) => pattern(f_hash(key), local_depth),
                // An empty segment can only be the untouched root.
                None => 0,
            };
            let stride = 1usize << (dir_depth - local_depth);
            let block_start = (seg_prefix as usize) * stride;
            for slot in table.iter_mut().skip(block_start).take(stride) {
                if *slot != NULL_SEGMENT {
                    return Err(IndexError::CorruptChain(format!(
                        "directory slot {} claimed by more than one segment",
                        block_start
                    )));
                }
                *slot = *id;
            }
            node_counts[segment_node(*id)] += 1;
        }
        if table.iter().any(|&id| id == NULL_SEGMENT) {
            return Err(IndexError::CorruptChain("sibling chain left directory slots unassigned".into()));
        }

        self.dir.replace(dir_depth, table);
        self.placement.rebuild_counts(&node_counts);
        Ok(())
    }

    fn any_live_key(seg: &Segment) -> Option<Key> {
        seg.bucket.iter().find_map(|p| {
            let k = p.key.load(std::sync::atomic::Ordering::Acquire);
            is_live(k).then_some(k)
        })
    }

    // -- Diagnostics (spec §3 supplemented: Utilization/Freqs/etc.) -----

    pub fn depth(&self) -> u32 {
        self.dir.depth()
    }

    pub fn capacity(&self) -> usize {
        self.dir.capacity() * K_NUM_SLOT
    }

    pub fn segment_loads(&self) -> Vec<u64> {
        self.placement.segment_loads()
    }

    /// Fraction of total slot capacity currently holding live keys,
    /// counted once per distinct segment (a segment shared by several
    /// directory entries is not double-counted).
    pub fn utilization(&self) -> f64 {
        let mut seen = std::collections::HashSet::new();
        let mut live = 0usize;
        let mut total = 0usize;
        for &id in self.dir.snapshot().iter() {
            if !seen.insert(id) {
                continue;
            }
            let seg = self.segment(id);
            let depth = seg.local_depth();
            let key = Self::any_live_key(seg);
            let expected = key.map(|k| pattern(f_hash(k), depth)).unwrap_or(0);
            live += seg.live_count(depth, expected);
            total += K_NUM_SLOT;
        }
        if total == 0 {
            0.0
        } else {
            live as f64 / total as f64
        }
    }

    /// Per-NUMA-node insert frequency, for diagnostics and tests of the
    /// split placement policies (spec §4.6's `Freqs`).
    pub fn freqs(&self) -> Vec<u64> {
        (0..self.pools.len()).map(|n| self.placement.segments_in_node(n)).collect()
    }

    /// Re-derive the directory and placement counters from the persisted
    /// sibling chain without touching any other state; exposed for the
    /// server's crash-recovery startup path, distinct from the implicit
    /// call `open` makes.
    pub fn reload_from_pm(&self) -> Result<()> {
        self.recover()
    }
}

#[allow(dead_code)]
const fn _assert_key_bits() -> u32 {
    KEY_BITS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pm::HeapPool;

    fn fresh_index(num_nodes: usize) -> Index {
        let pools: Vec<Arc<dyn PmPool>> =
            (0..num_nodes).map(|n| Arc::new(HeapPool::new(n, 4096)) as Arc<dyn PmPool>).collect();
        Index::open(pools, SplitPolicy::Skewed).unwrap()
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let idx = fresh_index(1);
        idx.insert(42, 4242).unwrap();
        assert_eq!(idx.get(42), Some(4242));
        assert_eq!(idx.get(1), None);
    }

    #[test]
    fn enough_inserts_force_a_split_and_directory_growth() {
        let idx = fresh_index(1);
        let initial_depth = idx.depth();
        for k in 1..2000u64 {
            idx.insert(k, k * 10).unwrap();
        }
        assert!(idx.depth() > initial_depth, "directory never grew past depth {initial_depth}");
        for k in 1..2000u64 {
            assert_eq!(idx.get(k), Some(k * 10), "lost key {k} across a split");
        }
    }

    #[test]
    fn distinct_keys_all_survive_many_inserts_across_nodes() {
        let idx = fresh_index(4);
        for k in 1..3000u64 {
            idx.insert(k, k + 1).unwrap();
        }
        for k in 1..3000u64 {
            assert_eq!(idx.get(k), Some(k + 1));
        }
        let freqs = idx.freqs();
        assert_eq!(freqs.len(), 4);
    }

    #[test]
    fn recover_rebuilds_an_equivalent_directory() {
        let idx = fresh_index(2);
        for k in 1..1500u64 {
            idx.insert(k, k).unwrap();
        }
        let depth_before = idx.depth();
        idx.recover().unwrap();
        assert_eq!(idx.depth(), depth_before);
        for k in 1..1500u64 {
            assert_eq!(idx.get(k), Some(k));
        }
    }

    #[test]
    fn get_node_id_matches_the_segment_actually_holding_the_key() {
        let idx = fresh_index(3);
        for k in 1..600u64 {
            idx.insert(k, k).unwrap();
        }
        for k in 1..600u64 {
            let node = idx.get_node_id(k);
            assert!(node < 3);
        }
    }
}
