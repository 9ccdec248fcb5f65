use super::SlotId;

/// Intrusive LIFO stack of unused slots, linked through a per-slot array so
/// acquire and release never allocate.
pub(crate) struct FreeList {
    next: Box<[Option<SlotId>]>,
    head: Option<SlotId>,
    len: usize,
}

impl FreeList {
    /// Every slot starts free; slot 0 is handed out first.
    pub fn new(capacity: usize) -> Self {
        let next = (0..capacity)
            .map(|i| (i + 1 < capacity).then_some(SlotId(i + 1)))
            .collect();
        Self {
            next,
            head: (capacity > 0).then_some(SlotId(0)),
            len: capacity,
        }
    }

    pub fn acquire(&mut self) -> Option<SlotId> {
        let slot = self.head?;
        self.head = self.next[slot.0].take();
        self.len -= 1;
        Some(slot)
    }

    /// Caller guarantees `slot` is not already on the list.
    pub fn release(&mut self, slot: SlotId) {
        self.next[slot.0] = self.head;
        self.head = Some(slot);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn iter(&self) -> impl Iterator<Item = SlotId> + '_ {
        std::iter::successors(self.head, move |slot| self.next[slot.0])
    }
}
