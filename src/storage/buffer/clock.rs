use super::replacer::Replacer;
use crate::storage::page::PageId;
use std::collections::HashMap;

#[derive(Debug)]
struct ClockSlot {
    page_id: PageId,
    evictable: bool,
    referenced: bool,
}

/// Second-chance replacement. A page touched since the hand last passed it
/// survives one more sweep.
#[derive(Debug, Default)]
pub struct ClockReplacer {
    ring: Vec<ClockSlot>,
    index: HashMap<PageId, usize>,
    hand: usize,
    evictable: usize,
}

impl ClockReplacer {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, page_id: PageId) -> Option<&mut ClockSlot> {
        let idx = *self.index.get(&page_id)?;
        self.ring.get_mut(idx)
    }

    fn remove_at(&mut self, idx: usize) -> ClockSlot {
        let slot = self.ring.swap_remove(idx);
        self.index.remove(&slot.page_id);
        if let Some(moved) = self.ring.get(idx) {
            self.index.insert(moved.page_id, idx);
        }
        if slot.evictable {
            self.evictable -= 1;
        }
        slot
    }

    fn insert(&mut self, page_id: PageId, evictable: bool) {
        self.index.insert(page_id, self.ring.len());
        self.ring.push(ClockSlot {
            page_id,
            evictable,
            referenced: true,
        });
        if evictable {
            self.evictable += 1;
        }
    }
}

impl Replacer for ClockReplacer {
    fn evict(&mut self) -> Option<PageId> {
        if self.evictable == 0 {
            return None;
        }
        // Two sweeps clear every reference bit, so a victim is always found.
        for _ in 0..=2 * self.ring.len() {
            if self.hand >= self.ring.len() {
                self.hand = 0;
            }
            let slot = &mut self.ring[self.hand];
            if slot.evictable {
                if slot.referenced {
                    slot.referenced = false;
                } else {
                    return Some(self.remove_at(self.hand).page_id);
                }
            }
            self.hand += 1;
        }
        None
    }

    fn pin(&mut self, page_id: PageId) {
        let mut was_evictable = false;
        match self.slot_mut(page_id) {
            Some(slot) => {
                was_evictable = slot.evictable;
                slot.evictable = false;
                slot.referenced = true;
            }
            None => self.insert(page_id, false),
        }
        if was_evictable {
            self.evictable -= 1;
        }
    }

    fn unpin(&mut self, page_id: PageId) {
        let mut became_evictable = false;
        match self.slot_mut(page_id) {
            Some(slot) => {
                became_evictable = !slot.evictable;
                slot.evictable = true;
                slot.referenced = true;
            }
            None => self.insert(page_id, true),
        }
        if became_evictable {
            self.evictable += 1;
        }
    }

    fn remove(&mut self, page_id: PageId) {
        if let Some(&idx) = self.index.get(&page_id) {
            self.remove_at(idx);
        }
    }

    fn size(&self) -> usize {
        self.evictable
    }
}
