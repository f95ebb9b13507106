use super::replacer::Replacer;
use crate::storage::page::PageId;
use std::collections::{BTreeMap, HashMap};

/// Evicts the page that has been unpinned the longest.
#[derive(Debug, Default)]
pub struct LruReplacer {
    /// Evictable pages keyed by the tick they were unpinned at (oldest first)
    lru_list: BTreeMap<u64, PageId>,
    /// Tick of each evictable page for O(log n) removal
    page_map: HashMap<PageId, u64>,
    tick: u64,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Replacer for LruReplacer {
    fn evict(&mut self) -> Option<PageId> {
        let (_, page_id) = self.lru_list.pop_first()?;
        self.page_map.remove(&page_id);
        Some(page_id)
    }

    fn pin(&mut self, page_id: PageId) {
        if let Some(tick) = self.page_map.remove(&page_id) {
            self.lru_list.remove(&tick);
        }
    }

    fn unpin(&mut self, page_id: PageId) {
        if !self.page_map.contains_key(&page_id) {
            self.tick += 1;
            self.lru_list.insert(self.tick, page_id);
            self.page_map.insert(page_id, self.tick);
        }
    }

    fn remove(&mut self, page_id: PageId) {
        self.pin(page_id);
    }

    fn size(&self) -> usize {
        self.page_map.len()
    }
}
