//! Bounded id-to-entry map, `NUM_ENTRY` slots wide.
//!
//! The original client (`rdpma_prep_nsw`) hands out a small integer id
//! from a Linux `idr` allocator bounded by `NUM_ENTRY`, stashes a
//! `status_wait` descriptor under it, and encodes the id into the
//! outgoing imm word's `msg_num` field so the eventual reply can find it
//! again with no server-side lookup (spec §3, "Status-wait descriptor").
//! [`IdSlotMap`] is that allocator generalized over the entry type `T`:
//! the client instantiates it with its wait descriptor, the server's
//! reply path in principle could reuse the same bound to track
//! in-flight per-(qid,msg_num) request descriptors.

use crate::error::{QueueError, Result};
use parking_lot::Mutex;
use rdpma_proto::NUM_ENTRY;

struct Slot<T> {
    entry: Option<T>,
}

/// Fixed-capacity id allocator: `alloc` reserves the first free id and
/// stores `entry` under it; `remove` frees the id back to the pool.
/// Capacity is exactly [`rdpma_proto::NUM_ENTRY`], the width of the
/// `msg_num` control-word field (spec §4.1), so an id always fits.
pub struct IdSlotMap<T> {
    slots: Mutex<Vec<Slot<T>>>,
    next_hint: Mutex<usize>,
}

impl<T> IdSlotMap<T> {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(NUM_ENTRY as usize);
        slots.resize_with(NUM_ENTRY as usize, || Slot { entry: None });
        Self {
            slots: Mutex::new(slots),
            next_hint: Mutex::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        NUM_ENTRY as usize
    }

    /// Reserve the next free id and store `entry` under it.
    pub fn alloc(&self, entry: T) -> Result<u16> {
        let mut slots = self.slots.lock();
        let mut hint = self.next_hint.lock();
        let start = *hint;
        for i in 0..slots.len() {
            let idx = (start + i) % slots.len();
            if slots[idx].entry.is_none() {
                slots[idx].entry = Some(entry);
                *hint = (idx + 1) % slots.len();
                return Ok(idx as u16);
            }
        }
        Err(QueueError::IdSpaceExhausted)
    }

    /// Remove and return the entry registered at `id`.
    pub fn remove(&self, id: u16) -> Result<T> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(id as usize)
            .ok_or(QueueError::NotRegistered(id))?;
        slot.entry.take().ok_or(QueueError::NotRegistered(id))
    }

    pub fn in_use(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.entry.is_some()).count()
    }
}

impl<T: Clone> IdSlotMap<T> {
    /// Look up the entry registered at `id` without freeing its slot;
    /// used by a completion poller that must hand a reply to whatever
    /// is registered under its `msg_num` without racing the waiter's
    /// own `remove` (spec §3: reply routing needs no server-side
    /// lookup beyond this slot).
    pub fn get(&self, id: u16) -> Result<T> {
        let slots = self.slots.lock();
        slots
            .get(id as usize)
            .and_then(|s| s.entry.clone())
            .ok_or(QueueError::NotRegistered(id))
    }
}

impl<T> Default for IdSlotMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_remove_roundtrips() {
        let map: IdSlotMap<&'static str> = IdSlotMap::new();
        let id = map.alloc("hello").unwrap();
        assert_eq!(map.remove(id).unwrap(), "hello");
    }

    #[test]
    fn remove_twice_fails() {
        let map: IdSlotMap<u32> = IdSlotMap::new();
        let id = map.alloc(42).unwrap();
        map.remove(id).unwrap();
        assert!(matches!(map.remove(id), Err(QueueError::NotRegistered(_))));
    }

    #[test]
    fn exhausting_capacity_returns_id_space_exhausted() {
        let map: IdSlotMap<u32> = IdSlotMap::new();
        for i in 0..map.capacity() {
            map.alloc(i as u32).unwrap();
        }
        assert!(matches!(map.alloc(0), Err(QueueError::IdSpaceExhausted)));
    }

    #[test]
    fn freed_ids_are_reused() {
        let map: IdSlotMap<u32> = IdSlotMap::new();
        let ids: Vec<u16> = (0..map.capacity()).map(|i| map.alloc(i as u32).unwrap()).collect();
        for id in &ids {
            map.remove(*id).unwrap();
        }
        assert!(map.alloc(999).is_ok());
        assert_eq!(map.in_use(), 1);
    }

    #[test]
    fn get_does_not_free_the_slot() {
        let map: IdSlotMap<u32> = IdSlotMap::new();
        let id = map.alloc(7).unwrap();
        assert_eq!(map.get(id).unwrap(), 7);
        assert_eq!(map.get(id).unwrap(), 7);
        assert_eq!(map.remove(id).unwrap(), 7);
    }
}
