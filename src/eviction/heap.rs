//! A binary min-heap that reports where its items move, so that holders can
//! remove an arbitrary item in O(log n).

use crate::cache::ll::SlotId;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct HeapItem {
    pub(crate) ordering: u64,
    // Offer sequence, breaks ties toward the oldest offer.
    pub(crate) seq: u64,
    pub(crate) id: SlotId,
}

impl HeapItem {
    fn key(&self) -> (u64, u64) {
        (self.ordering, self.seq)
    }
}

#[derive(Debug, Default)]
pub(crate) struct IndexedHeap {
    items: Vec<HeapItem>,
}

impl IndexedHeap {
    pub(crate) fn new() -> Self {
        IndexedHeap::default()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn peek(&self) -> Option<&HeapItem> {
        self.items.first()
    }

    /// `track` is told the new position of every item that moves, and `None`
    /// for the item that leaves.
    pub(crate) fn push<F>(&mut self, item: HeapItem, track: &mut F)
    where
        F: FnMut(SlotId, Option<usize>),
    {
        self.items.push(item);
        let pos = self.items.len() - 1;
        track(item.id, Some(pos));
        self.sift_up(pos, track);
    }

    pub(crate) fn pop<F>(&mut self, track: &mut F) -> Option<HeapItem>
    where
        F: FnMut(SlotId, Option<usize>),
    {
        if self.items.is_empty() {
            None
        } else {
            Some(self.remove(0, track))
        }
    }

    pub(crate) fn remove<F>(&mut self, pos: usize, track: &mut F) -> HeapItem
    where
        F: FnMut(SlotId, Option<usize>),
    {
        debug_assert!(pos < self.items.len());
        let last = self.items.len() - 1;
        self.swap(pos, last, track);
        let Some(item) = self.items.pop() else {
            unreachable!("remove from an empty heap");
        };
        track(item.id, None);
        if pos < self.items.len() {
            // The moved item may need to go either way.
            self.sift_down(pos, track);
            self.sift_up(pos, track);
        }
        item
    }

    fn swap<F>(&mut self, a: usize, b: usize, track: &mut F)
    where
        F: FnMut(SlotId, Option<usize>),
    {
        if a == b {
            return;
        }
        self.items.swap(a, b);
        track(self.items[a].id, Some(a));
        track(self.items[b].id, Some(b));
    }

    fn sift_up<F>(&mut self, mut pos: usize, track: &mut F)
    where
        F: FnMut(SlotId, Option<usize>),
    {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.items[pos].key() < self.items[parent].key() {
                self.swap(pos, parent, track);
                pos = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down<F>(&mut self, mut pos: usize, track: &mut F)
    where
        F: FnMut(SlotId, Option<usize>),
    {
        let len = self.items.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;
            if left < len && self.items[left].key() < self.items[smallest].key() {
                smallest = left;
            }
            if right < len && self.items[right].key() < self.items[smallest].key() {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.swap(pos, smallest, track);
            pos = smallest;
        }
    }

    #[cfg(test)]
    pub(crate) fn verify(&self) {
        for pos in 1..self.items.len() {
            let parent = (pos - 1) / 2;
            assert!(self.items[parent].key() <= self.items[pos].key());
        }
    }
}
