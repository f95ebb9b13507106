//! Page cache between the B-tree and the page store.
//!
//! The pool only ever holds committed page images. A transaction's own
//! changes live in its private page set until commit, when they are
//! installed here as new versions. Readers pin the version visible at their
//! snapshot; older versions stay resident only while some open snapshot can
//! still see them.

pub mod clock;
pub mod lru;
pub mod replacer;

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::storage::disk::PageStore;
use crate::storage::page::{PageBuf, PageId};
use crate::storage::wal::Lsn;
use crate::transaction::TransactionId;
use replacer::Replacer;

/// Snapshot that sees the newest committed version of every page.
pub const LATEST: Lsn = Lsn(u64::MAX);

#[derive(Debug, Clone)]
struct Version {
    /// Commit that produced this image. Images read from the store use
    /// `Lsn(0)` since every open snapshot can see them.
    lsn: Lsn,
    data: Arc<PageBuf>,
}

struct Frame {
    /// Oldest first. Never empty.
    versions: Vec<Version>,
    pin_count: u32,
    /// Newest version differs from the store.
    dirty: bool,
}

impl Frame {
    fn loaded(data: Box<PageBuf>) -> Self {
        Frame {
            versions: vec![Version {
                lsn: Lsn(0),
                data: Arc::from(data),
            }],
            pin_count: 0,
            dirty: false,
        }
    }

    fn newest(&self) -> &Version {
        &self.versions[self.versions.len() - 1]
    }

    fn newest_mut(&mut self) -> &mut Version {
        let last = self.versions.len() - 1;
        &mut self.versions[last]
    }

    fn visible(&self, snapshot: Lsn) -> Option<&Version> {
        self.versions.iter().rev().find(|v| v.lsn <= snapshot)
    }

    /// Drop superseded versions no active snapshot falls in front of.
    fn prune(&mut self, active: &[Lsn]) {
        if self.versions.len() <= 1 {
            return;
        }
        let last = self.versions.len() - 1;
        let keep: Vec<bool> = (0..=last)
            .map(|i| {
                i == last || {
                    let from = self.versions[i].lsn;
                    let until = self.versions[i + 1].lsn;
                    active.iter().any(|s| from <= *s && *s < until)
                }
            })
            .collect();
        let mut keep = keep.into_iter();
        self.versions.retain(|_| keep.next().unwrap_or(true));
    }

    fn evictable(&self) -> bool {
        self.pin_count == 0 && self.versions.len() == 1
    }
}

/// A committed page image for `BufferPool::install`.
pub struct InstallPage {
    pub page_id: PageId,
    /// Committed image the transaction started from, if the page existed.
    pub before: Option<Arc<PageBuf>>,
    pub after: Arc<PageBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub capacity: usize,
    pub resident: usize,
    pub pinned: usize,
    pub dirty: usize,
    /// Retained versions beyond the newest one, summed over all pages.
    pub old_versions: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub writebacks: u64,
}

struct PoolState {
    frames: HashMap<PageId, Frame>,
    /// Pages a live writer has claimed.
    owners: HashMap<PageId, TransactionId>,
    replacer: Box<dyn Replacer>,
    hits: u64,
    misses: u64,
    evictions: u64,
    writebacks: u64,
}

pub struct BufferPool {
    state: Mutex<PoolState>,
    store: Mutex<PageStore>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(store: PageStore, replacer: Box<dyn Replacer>, capacity: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                frames: HashMap::with_capacity(capacity),
                owners: HashMap::new(),
                replacer,
                hits: 0,
                misses: 0,
                evictions: 0,
                writebacks: 0,
            }),
            store: Mutex::new(store),
            capacity,
        }
    }

    /// Pin the version of `page_id` visible at `snapshot`.
    pub fn fetch(&self, page_id: PageId, snapshot: Lsn) -> Result<PageRef<'_>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if !state.frames.contains_key(&page_id) {
            state.misses += 1;
            let mut store = self.store.lock();
            self.make_room(state, &mut store)?;
            let data = store.read_raw(page_id)?;
            trace!("Loaded {} into the cache", page_id);
            state.frames.insert(page_id, Frame::loaded(data));
        } else {
            state.hits += 1;
        }

        let frame = state
            .frames
            .get_mut(&page_id)
            .ok_or_else(|| Error::corruption(format!("{} vanished from the cache", page_id)))?;
        let data = match frame.visible(snapshot) {
            Some(version) => Arc::clone(&version.data),
            None => {
                return Err(Error::corruption(format!(
                    "{} has no version visible at {}",
                    page_id, snapshot
                )));
            }
        };
        frame.pin_count += 1;
        state.replacer.pin(page_id);

        Ok(PageRef {
            pool: self,
            page_id,
            data,
        })
    }

    /// Pin the newest committed version of `page_id`.
    pub fn fetch_latest(&self, page_id: PageId) -> Result<PageRef<'_>> {
        self.fetch(page_id, LATEST)
    }

    fn unpin(&self, page_id: PageId) {
        let mut state = self.state.lock();
        let now_unpinned = match state.frames.get_mut(&page_id) {
            Some(frame) => {
                frame.pin_count = frame.pin_count.saturating_sub(1);
                frame.pin_count == 0
            }
            None => false,
        };
        if now_unpinned {
            state.replacer.unpin(page_id);
        }
    }

    /// Record that `transaction_id` is about to modify `page_id`.
    pub fn claim(&self, page_id: PageId, transaction_id: TransactionId) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(&owner) = state.owners.get(&page_id) {
            if owner != transaction_id {
                return Err(Error::ConcurrentModification {
                    page_id,
                    owner,
                    requester: transaction_id,
                });
            }
            return Ok(());
        }
        state.owners.insert(page_id, transaction_id);
        Ok(())
    }

    pub fn release_claims(&self, transaction_id: TransactionId) {
        self.state
            .lock()
            .owners
            .retain(|_, owner| *owner != transaction_id);
    }

    /// Publish the pages of a commit as the newest versions.
    ///
    /// `active` lists the snapshots still open. Versions they can see are
    /// kept alongside the new ones, everything else is released.
    pub fn install(&self, commit_lsn: Lsn, pages: Vec<InstallPage>, active: &[Lsn]) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let retain = !active.is_empty();

        for page in pages {
            let new_version = Version {
                lsn: commit_lsn,
                data: page.after,
            };
            match state.frames.get_mut(&page.page_id) {
                Some(frame) => {
                    frame.versions.push(new_version);
                    frame.prune(active);
                    frame.dirty = true;
                }
                None => {
                    let mut versions = Vec::with_capacity(2);
                    if let (true, Some(before)) = (retain, page.before) {
                        versions.push(Version {
                            lsn: Lsn(0),
                            data: before,
                        });
                    }
                    versions.push(new_version);
                    let mut frame = Frame {
                        versions,
                        pin_count: 0,
                        dirty: true,
                    };
                    frame.prune(active);
                    state.frames.insert(page.page_id, frame);
                    state.replacer.unpin(page.page_id);
                }
            }
        }

        let mut store = self.store.lock();
        if let Err(e) = self.shrink(state, &mut store) {
            warn!("Cache eviction after {} failed: {}", commit_lsn, e);
        }
    }

    /// Release versions no snapshot in `active` can see any more.
    pub fn prune(&self, active: &[Lsn]) {
        let mut state = self.state.lock();
        for frame in state.frames.values_mut() {
            frame.prune(active);
        }
        let mut store = self.store.lock();
        if let Err(e) = self.shrink(&mut state, &mut store) {
            warn!("Cache eviction after pruning failed: {}", e);
        }
    }

    /// Apply `update` to the newest version of a page in place and mark it
    /// dirty. Open snapshots holding the old image keep their copy.
    pub fn update_latest<F>(&self, page_id: PageId, update: F) -> Result<()>
    where
        F: FnOnce(&mut PageBuf),
    {
        let mut state = self.state.lock();
        if !state.frames.contains_key(&page_id) {
            let data = self.store.lock().read_raw(page_id)?;
            state.frames.insert(page_id, Frame::loaded(data));
            state.replacer.unpin(page_id);
        }
        if let Some(frame) = state.frames.get_mut(&page_id) {
            update(Arc::make_mut(&mut frame.newest_mut().data));
            frame.dirty = true;
        }
        Ok(())
    }

    /// Write every dirty page to the store. The meta page goes last, after
    /// the rest are synced, so it never describes pages that are not there.
    pub fn flush_all(&self) -> Result<usize> {
        let mut state = self.state.lock();
        let mut store = self.store.lock();

        let mut dirty: Vec<PageId> = state
            .frames
            .iter()
            .filter(|(_, frame)| frame.dirty)
            .map(|(page_id, _)| *page_id)
            .collect();
        dirty.sort();

        let meta_dirty = dirty.first() == Some(&PageId::META);
        let rest = if meta_dirty { &dirty[1..] } else { &dirty[..] };

        for page_id in rest {
            Self::write_back(&mut state, &mut store, *page_id)?;
        }
        store.sync()?;
        if meta_dirty {
            Self::write_back(&mut state, &mut store, PageId::META)?;
            store.sync()?;
        }

        debug!("Flushed {} dirty pages", dirty.len());
        Ok(dirty.len())
    }

    fn write_back(state: &mut PoolState, store: &mut PageStore, page_id: PageId) -> Result<()> {
        if let Some(frame) = state.frames.get_mut(&page_id) {
            store.write_raw(page_id, &frame.newest().data)?;
            frame.dirty = false;
            state.writebacks += 1;
        }
        Ok(())
    }

    /// Make space for one more frame if the pool is at capacity.
    fn make_room(&self, state: &mut PoolState, store: &mut PageStore) -> Result<()> {
        if state.frames.len() >= self.capacity && !self.evict_one(state, store)? {
            warn!(
                "Buffer cache over capacity ({} resident, capacity {}): nothing evictable",
                state.frames.len(),
                self.capacity
            );
        }
        Ok(())
    }

    fn shrink(&self, state: &mut PoolState, store: &mut PageStore) -> Result<()> {
        while state.frames.len() > self.capacity {
            if !self.evict_one(state, store)? {
                break;
            }
        }
        Ok(())
    }

    /// Evict one page, writing it back first if dirty. Pages with retained
    /// versions, and dirty pages of a read-only store, are passed over.
    fn evict_one(&self, state: &mut PoolState, store: &mut PageStore) -> Result<bool> {
        let mut skipped = Vec::new();
        let mut result = Ok(false);

        while let Some(page_id) = state.replacer.evict() {
            let (evictable, dirty) = match state.frames.get(&page_id) {
                Some(frame) => (frame.evictable(), frame.dirty),
                None => continue,
            };
            if !evictable || (dirty && store.is_read_only()) {
                skipped.push(page_id);
                continue;
            }
            if dirty {
                if let Err(e) = Self::write_back(state, store, page_id) {
                    skipped.push(page_id);
                    result = Err(e);
                    break;
                }
            }
            state.frames.remove(&page_id);
            state.evictions += 1;
            trace!("Evicted {}", page_id);
            result = Ok(true);
            break;
        }

        for page_id in skipped {
            state.replacer.unpin(page_id);
        }
        result
    }

    /// Run `f` with exclusive access to the page store.
    pub fn with_store<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut PageStore) -> Result<R>,
    {
        let mut store = self.store.lock();
        f(&mut store)
    }

    pub fn is_read_only(&self) -> bool {
        self.store.lock().is_read_only()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            capacity: self.capacity,
            resident: state.frames.len(),
            pinned: state.frames.values().filter(|f| f.pin_count > 0).count(),
            dirty: state.frames.values().filter(|f| f.dirty).count(),
            old_versions: state.frames.values().map(|f| f.versions.len() - 1).sum(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            writebacks: state.writebacks,
        }
    }

    #[cfg(test)]
    fn version_count(&self, page_id: PageId) -> usize {
        self.state
            .lock()
            .frames
            .get(&page_id)
            .map(|f| f.versions.len())
            .unwrap_or(0)
    }
}

/// A pinned, read-only view of one page version. Dropping it unpins the page.
pub struct PageRef<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    data: Arc<PageBuf>,
}

impl PageRef<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Share the underlying image beyond the lifetime of the pin.
    pub fn share(&self) -> Arc<PageBuf> {
        Arc::clone(&self.data)
    }
}

impl Deref for PageRef<'_> {
    type Target = PageBuf;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl Drop for PageRef<'_> {
    fn drop(&mut self) {
        self.pool.unpin(self.page_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::{zeroed_page, PageType, PAGE_BODY_OFFSET};
    use tempfile::{tempdir, TempDir};

    fn create_test_buffer_pool(capacity: usize) -> Result<(BufferPool, TempDir)> {
        let dir = tempdir()?;
        let store = PageStore::create(&dir.path().join("test.db"))?;
        let replacer = replacer::for_policy(crate::config::EvictionPolicy::Lru);
        Ok((BufferPool::new(store, replacer, capacity), dir))
    }

    fn image(byte: u8) -> Arc<PageBuf> {
        let mut page = zeroed_page();
        PageType::Leaf.stamp(&mut page);
        page[PAGE_BODY_OFFSET] = byte;
        Arc::from(page)
    }

    fn commit(pool: &BufferPool, lsn: u64, page: u64, byte: u8, active: &[Lsn]) {
        pool.install(
            Lsn(lsn),
            vec![InstallPage {
                page_id: PageId(page),
                before: None,
                after: image(byte),
            }],
            active,
        );
    }

    #[test]
    fn test_fetch_loads_from_store() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(10)?;

        let meta = pool.fetch_latest(PageId::META)?;
        assert_eq!(PageType::of(&meta)?, PageType::Meta);
        drop(meta);

        let _again = pool.fetch_latest(PageId::META)?;
        let stats = pool.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.pinned, 1);
        Ok(())
    }

    #[test]
    fn test_install_replaces_without_snapshots() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(10)?;
        commit(&pool, 1, 2, 10, &[]);
        commit(&pool, 2, 2, 20, &[]);

        assert_eq!(pool.version_count(PageId(2)), 1);
        assert_eq!(pool.fetch_latest(PageId(2))?[PAGE_BODY_OFFSET], 20);
        assert_eq!(pool.stats().dirty, 1);
        Ok(())
    }

    #[test]
    fn test_snapshot_sees_retained_version() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(10)?;
        commit(&pool, 1, 2, 10, &[]);

        // A reader opened at LSN 1 is still active when LSN 2 commits.
        commit(&pool, 2, 2, 20, &[Lsn(1)]);
        assert_eq!(pool.version_count(PageId(2)), 2);
        assert_eq!(pool.fetch(PageId(2), Lsn(1))?[PAGE_BODY_OFFSET], 10);
        assert_eq!(pool.fetch(PageId(2), Lsn(2))?[PAGE_BODY_OFFSET], 20);

        pool.prune(&[]);
        assert_eq!(pool.version_count(PageId(2)), 1);
        Ok(())
    }

    #[test]
    fn test_before_image_retained_for_uncached_page() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(10)?;
        pool.install(
            Lsn(5),
            vec![InstallPage {
                page_id: PageId(3),
                before: Some(image(1)),
                after: image(2),
            }],
            &[Lsn(4)],
        );

        assert_eq!(pool.fetch(PageId(3), Lsn(4))?[PAGE_BODY_OFFSET], 1);
        assert_eq!(pool.fetch_latest(PageId(3))?[PAGE_BODY_OFFSET], 2);
        Ok(())
    }

    #[test]
    fn test_invisible_version_is_an_error() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(10)?;
        commit(&pool, 7, 4, 1, &[]);
        assert!(matches!(
            pool.fetch(PageId(4), Lsn(3)),
            Err(Error::Corruption(_))
        ));
        Ok(())
    }

    #[test]
    fn test_eviction_writes_back_dirty_pages() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(2)?;
        commit(&pool, 1, 2, 2, &[]);
        commit(&pool, 2, 3, 3, &[]);
        commit(&pool, 3, 4, 4, &[]);

        let stats = pool.stats();
        assert_eq!(stats.resident, 2);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.writebacks, 1);

        // Page 2 was evicted first and must come back from the store.
        assert_eq!(pool.fetch_latest(PageId(2))?[PAGE_BODY_OFFSET], 2);
        Ok(())
    }

    #[test]
    fn test_pinned_pages_are_not_evicted() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(2)?;
        commit(&pool, 1, 2, 2, &[]);
        commit(&pool, 2, 3, 3, &[]);

        let held_2 = pool.fetch_latest(PageId(2))?;
        let held_3 = pool.fetch_latest(PageId(3))?;
        // Nothing is evictable so the pool grows past capacity.
        let meta = pool.fetch_latest(PageId::META)?;
        assert_eq!(pool.stats().resident, 3);
        assert_eq!(held_2[PAGE_BODY_OFFSET], 2);
        drop((held_2, held_3, meta));
        Ok(())
    }

    #[test]
    fn test_claims() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(10)?;
        let a = TransactionId::new(1);
        let b = TransactionId::new(2);

        pool.claim(PageId(2), a)?;
        pool.claim(PageId(2), a)?;
        assert!(matches!(
            pool.claim(PageId(2), b),
            Err(Error::ConcurrentModification { .. })
        ));

        pool.release_claims(a);
        pool.claim(PageId(2), b)?;
        Ok(())
    }

    #[test]
    fn test_flush_all_and_update_latest() -> Result<()> {
        let (pool, dir) = create_test_buffer_pool(10)?;
        commit(&pool, 1, 2, 42, &[]);
        pool.update_latest(PageId::META, |meta| {
            crate::storage::page::meta_page::MetaPage::set_checkpoint_lsn(meta, Lsn(1))
        })?;

        assert_eq!(pool.flush_all()?, 2);
        assert_eq!(pool.stats().dirty, 0);

        let mut store = PageStore::open(&dir.path().join("test.db"), true)?;
        assert_eq!(store.read_raw(PageId(2))?[PAGE_BODY_OFFSET], 42);
        let meta = store.read_meta()?;
        assert_eq!(
            crate::storage::page::meta_page::MetaPage::checkpoint_lsn(&meta),
            Lsn(1)
        );
        Ok(())
    }
}
