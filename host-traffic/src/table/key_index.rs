use host_traffic_common::MacAddr;

use super::{SlotId, pool::EntryPool};

/// Chained hash index from hardware address to slot.
///
/// Chains are doubly linked through per-slot arrays, so removal is O(1) given
/// the slot. The bucket count equals the table capacity and must be a power of
/// two because the hash is masked, not reduced modulo.
pub(crate) struct KeyIndex {
    heads: Box<[Option<SlotId>]>,
    next: Box<[Option<SlotId>]>,
    prev: Box<[Option<SlotId>]>,
    /// Bucket each slot is chained in; `None` while the slot is not indexed.
    bucket: Box<[Option<usize>]>,
    mask: usize,
}

impl KeyIndex {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self {
            heads: vec![None; capacity].into_boxed_slice(),
            next: vec![None; capacity].into_boxed_slice(),
            prev: vec![None; capacity].into_boxed_slice(),
            bucket: vec![None; capacity].into_boxed_slice(),
            mask: capacity - 1,
        }
    }

    /// XOR of the two low-order address bytes, masked to the bucket count.
    pub fn bucket_of(&self, mac: &MacAddr) -> usize {
        usize::from(mac.0[4] ^ mac.0[5]) & self.mask
    }

    pub fn find(&self, pool: &EntryPool, mac: &MacAddr) -> Option<SlotId> {
        let mut cursor = self.heads[self.bucket_of(mac)];
        while let Some(slot) = cursor {
            if pool.get(slot).info.mac == *mac {
                return Some(slot);
            }
            cursor = self.next[slot.0];
        }
        None
    }

    /// Caller guarantees `mac` is not indexed yet and `slot` is unlinked.
    pub fn insert(&mut self, mac: &MacAddr, slot: SlotId) {
        let bucket = self.bucket_of(mac);
        let old_head = self.heads[bucket];
        if let Some(head) = old_head {
            self.prev[head.0] = Some(slot);
        }
        self.next[slot.0] = old_head;
        self.prev[slot.0] = None;
        self.bucket[slot.0] = Some(bucket);
        self.heads[bucket] = Some(slot);
    }

    /// Unlinks `slot`; returns false if it was not indexed.
    pub fn remove(&mut self, slot: SlotId) -> bool {
        let Some(bucket) = self.bucket[slot.0].take() else {
            return false;
        };
        let prev = self.prev[slot.0].take();
        let next = self.next[slot.0].take();
        match prev {
            Some(p) => self.next[p.0] = next,
            None => self.heads[bucket] = next,
        }
        if let Some(n) = next {
            self.prev[n.0] = prev;
        }
        true
    }

    pub fn contains(&self, slot: SlotId) -> bool {
        self.bucket[slot.0].is_some()
    }

    pub fn len(&self) -> usize {
        self.bucket.iter().filter(|b| b.is_some()).count()
    }

    #[cfg(test)]
    pub fn chain_len(&self, bucket: usize) -> usize {
        std::iter::successors(self.heads[bucket], |slot| self.next[slot.0]).count()
    }
}
