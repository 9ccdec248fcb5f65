use super::SlotId;

/// Insertion-ordered list of active slots: newest at the front, eviction
/// victim at the back.
///
/// A slot keeps its position for as long as it stays active. Traffic on a
/// known host does not move it, so eviction is FIFO by first sighting rather
/// than least-recently-used.
pub(crate) struct EvictionQueue {
    head: Option<SlotId>,
    tail: Option<SlotId>,
    next: Box<[Option<SlotId>]>,
    prev: Box<[Option<SlotId>]>,
    linked: Box<[bool]>,
    len: usize,
}

impl EvictionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            head: None,
            tail: None,
            next: vec![None; capacity].into_boxed_slice(),
            prev: vec![None; capacity].into_boxed_slice(),
            linked: vec![false; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Caller guarantees `slot` is not queued.
    pub fn push_front(&mut self, slot: SlotId) {
        debug_assert!(!self.linked[slot.0], "slot {slot} queued twice");
        self.prev[slot.0] = None;
        self.next[slot.0] = self.head;
        match self.head {
            Some(head) => self.prev[head.0] = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
        self.linked[slot.0] = true;
        self.len += 1;
    }

    /// Unlinks and returns the oldest insertion.
    pub fn pop_back(&mut self) -> Option<SlotId> {
        let tail = self.tail?;
        self.remove(tail);
        Some(tail)
    }

    /// Unlinks `slot`; returns false if it was not queued.
    pub fn remove(&mut self, slot: SlotId) -> bool {
        if !self.linked[slot.0] {
            return false;
        }
        let prev = self.prev[slot.0].take();
        let next = self.next[slot.0].take();
        match prev {
            Some(p) => self.next[p.0] = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.prev[n.0] = prev,
            None => self.tail = prev,
        }
        self.linked[slot.0] = false;
        self.len -= 1;
        true
    }

    pub fn front(&self) -> Option<SlotId> {
        self.head
    }

    pub fn back(&self) -> Option<SlotId> {
        self.tail
    }

    /// Slot behind `slot`, i.e. the next older insertion.
    pub fn next_of(&self, slot: SlotId) -> Option<SlotId> {
        self.next[slot.0]
    }

    pub fn contains(&self, slot: SlotId) -> bool {
        self.linked[slot.0]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn iter(&self) -> impl Iterator<Item = SlotId> + '_ {
        std::iter::successors(self.head, move |slot| self.next[slot.0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(queue: &EvictionQueue) -> Vec<usize> {
        queue.iter().map(SlotId::index).collect()
    }

    #[test]
    fn newest_first_oldest_last() {
        let mut queue = EvictionQueue::new(4);
        for i in 0..3 {
            queue.push_front(SlotId(i));
        }
        assert_eq!(order(&queue), vec![2, 1, 0]);
        assert_eq!(queue.back(), Some(SlotId(0)));
        assert_eq!(queue.pop_back(), Some(SlotId(0)));
        assert_eq!(queue.pop_back(), Some(SlotId(1)));
        assert_eq!(order(&queue), vec![2]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_arbitrary_positions() {
        let mut queue = EvictionQueue::new(8);
        for i in 0..5 {
            queue.push_front(SlotId(i));
        }
        assert!(queue.remove(SlotId(2)));
        assert_eq!(order(&queue), vec![4, 3, 1, 0]);
        assert!(queue.remove(SlotId(4)));
        assert!(queue.remove(SlotId(0)));
        assert_eq!(order(&queue), vec![3, 1]);
        assert_eq!(queue.front(), Some(SlotId(3)));
        assert_eq!(queue.back(), Some(SlotId(1)));
        assert!(!queue.remove(SlotId(0)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn empties_cleanly() {
        let mut queue = EvictionQueue::new(2);
        assert_eq!(queue.pop_back(), None);
        queue.push_front(SlotId(1));
        assert!(queue.contains(SlotId(1)));
        assert!(queue.remove(SlotId(1)));
        assert!(!queue.contains(SlotId(1)));
        assert_eq!(queue.front(), None);
        assert_eq!(queue.pop_back(), None);
        queue.push_front(SlotId(1));
        assert_eq!(order(&queue), vec![1]);
    }
}
