use std::fmt::Debug;

use crate::config::EvictionPolicy;
use crate::storage::page::PageId;

use super::clock::ClockReplacer;
use super::lru::LruReplacer;

/// Chooses which cached page gives up its slot when the pool is full.
pub trait Replacer: Send + Debug {
    /// Select a page to evict. Returns None if no page can be evicted.
    fn evict(&mut self) -> Option<PageId>;

    /// Mark a page as pinned (not evictable).
    fn pin(&mut self, page_id: PageId);

    /// Mark a page as unpinned (evictable).
    fn unpin(&mut self, page_id: PageId);

    /// Forget a page that left the pool.
    fn remove(&mut self, page_id: PageId);

    /// Get the number of evictable pages.
    fn size(&self) -> usize;
}

pub fn for_policy(policy: EvictionPolicy) -> Box<dyn Replacer> {
    match policy {
        EvictionPolicy::Clock => Box::new(ClockReplacer::new()),
        EvictionPolicy::Lru => Box::new(LruReplacer::new()),
    }
}
