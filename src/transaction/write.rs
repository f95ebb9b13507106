//! The single write transaction.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use log::{debug, warn};

use super::{TransactionId, TransactionState};
use crate::access::btree::iterator::Scan;
use crate::access::{BTree, PageRead, PageView, PageWrite};
use crate::database::Engine;
use crate::error::{Error, Result};
use crate::storage::buffer::InstallPage;
use crate::storage::page::free_page::FreePage;
use crate::storage::page::meta_page::MetaPage;
use crate::storage::page::{zeroed_page, PageBuf, PageId};
use crate::storage::wal::Lsn;

/// A read-write transaction.
///
/// Pages are copied into a private set on first modification, so nothing
/// the transaction does is visible to readers until `commit` installs the
/// copies in the buffer pool. Dropping the transaction without committing
/// rolls it back.
pub struct WriteTransaction {
    engine: Arc<Engine>,
    id: TransactionId,
    state: TransactionState,
    /// Modified pages.
    dirty: BTreeMap<PageId, Box<PageBuf>>,
    /// Committed images the modified pages were copied from. Pages the
    /// transaction appended to the store have none.
    originals: HashMap<PageId, Arc<PageBuf>>,
    /// While an `insert` or `delete` runs, what each page it touched looked
    /// like in the write set before (`None` if it was not there yet).
    undo: Option<HashMap<PageId, Option<Box<PageBuf>>>>,
}

impl WriteTransaction {
    pub(crate) fn new(engine: Arc<Engine>, id: TransactionId) -> Self {
        debug!("Began write transaction {}", id);
        Self {
            engine,
            id,
            state: TransactionState::Active,
            dirty: BTreeMap::new(),
            originals: HashMap::new(),
            undo: None,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.state.is_active() {
            return Err(Error::InvalidState {
                id: self.id,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Look up a key, seeing this transaction's own changes.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_active()?;
        let result = BTree::new(self).get(key);
        self.engine.observe(result)
    }

    /// Insert or replace a value. Returns the previous value, if any.
    ///
    /// On error the write set is left as it was before the call, so the
    /// transaction can go on or commit what it already did.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        self.modify(|tree| tree.insert(key, value))
    }

    /// Remove a key. Returns whether it was present. Like `insert`, a
    /// failed delete changes nothing.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.modify(|tree| tree.delete(key))
    }

    /// Run one tree modification, putting back every page it touched if
    /// it fails part way, e.g. when a split cannot allocate a page.
    fn modify<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&mut BTree<&mut Self>) -> Result<T>,
    {
        self.ensure_active()?;
        self.undo = Some(HashMap::new());
        let result = op(&mut BTree::new(&mut *self));
        let undo = self.undo.take().unwrap_or_default();
        if let Err(e) = &result {
            debug!(
                "Undoing {} pages of a failed change in {}: {}",
                undo.len(),
                self.id,
                e
            );
            self.restore(undo);
        }
        self.engine.observe(result)
    }

    /// Note the write-set state of `page_id` the first time the running
    /// operation touches it.
    fn remember(&mut self, page_id: PageId) {
        let dirty = &self.dirty;
        if let Some(undo) = self.undo.as_mut() {
            undo.entry(page_id)
                .or_insert_with(|| dirty.get(&page_id).cloned());
        }
    }

    fn restore(&mut self, undo: HashMap<PageId, Option<Box<PageBuf>>>) {
        for (page_id, previous) in undo {
            match previous {
                Some(page) => {
                    self.dirty.insert(page_id, page);
                }
                None => {
                    self.dirty.remove(&page_id);
                    self.originals.remove(&page_id);
                }
            }
        }
    }

    /// Every entry with `low <= key <= high`.
    pub fn scan(&self, low: &[u8], high: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_active()?;
        let result = BTree::new(self).scan(low, high);
        self.engine.observe(result)
    }

    /// Visit the entries between two bounds in key order. `visit` returns
    /// `false` to stop early.
    pub fn scan_with<F>(&self, low: Bound<&[u8]>, high: Bound<&[u8]>, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        self.ensure_active()?;
        let tree = BTree::new(self);
        let result = visit_range(&tree, low, high, &mut visit);
        self.engine.observe(result)
    }

    /// Make every change durable and visible.
    pub fn commit(mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TransactionState::Committing;

        let commit_lsn = match self.write_log() {
            Ok(lsn) => lsn,
            Err(e) => {
                warn!("Commit of {} failed: {}", self.id, e);
                self.abort();
                return self.engine.observe(Err(e));
            }
        };

        let dirty = std::mem::take(&mut self.dirty);
        let page_count = dirty.len();
        let pages: Vec<InstallPage> = dirty
            .into_iter()
            .map(|(page_id, after)| InstallPage {
                page_id,
                before: self.originals.remove(&page_id),
                after: Arc::from(after),
            })
            .collect();
        let pool = &self.engine.pool;
        self.engine
            .transactions
            .publish(commit_lsn, |active| pool.install(commit_lsn, pages, active));

        self.state = TransactionState::Committed;
        debug!(
            "Committed {} at {} ({} pages)",
            self.id, commit_lsn, page_count
        );

        self.engine.checkpoint_if_needed();
        self.finish();
        Ok(())
    }

    /// Discard every change.
    pub fn rollback(mut self) -> Result<()> {
        self.ensure_active()?;
        self.abort();
        Ok(())
    }

    /// Log every dirty page and the commit marker. On failure the log is
    /// returned to where it was, so a half-written commit never replays.
    fn write_log(&mut self) -> Result<Lsn> {
        if self.dirty.is_empty() {
            return Ok(self.engine.transactions.last_committed());
        }
        let mut wal = self.engine.wal()?.lock();
        let mark = wal.mark();

        let result = (|| -> Result<Lsn> {
            for (page_id, after) in &self.dirty {
                let before = self.originals.get(page_id).map(|p| &**p);
                wal.append(self.id, *page_id, before, after)?;
            }
            let lsn = wal.append_commit(self.id)?;
            wal.flush()?;
            Ok(lsn)
        })();

        if result.is_err() {
            if let Err(e) = wal.rollback_to(mark) {
                warn!("Could not discard the log tail of {}: {}", self.id, e);
            }
        }
        result
    }

    fn abort(&mut self) {
        self.state = TransactionState::Aborting;
        let discarded = self.dirty.len();
        self.dirty.clear();
        self.originals.clear();
        self.undo = None;
        self.state = TransactionState::RolledBack;
        debug!("Rolled back {} ({} pages discarded)", self.id, discarded);
        self.finish();
    }

    fn finish(&self) {
        self.engine.pool.release_claims(self.id);
        self.engine.transactions.end_writer(self.id);
    }

    fn meta(&self) -> Result<PageView<'_>> {
        self.read_page(PageId::META)
    }

    /// Take a private copy of a page the transaction has not touched yet.
    fn copy_on_write(&mut self, page_id: PageId) -> Result<()> {
        self.engine.pool.claim(page_id, self.id)?;
        let committed = self.engine.pool.fetch_latest(page_id)?;
        let mut copy = zeroed_page();
        copy.copy_from_slice(&committed[..]);
        self.originals.insert(page_id, committed.share());
        self.dirty.insert(page_id, copy);
        Ok(())
    }
}

impl PageRead for WriteTransaction {
    fn read_page(&self, page_id: PageId) -> Result<PageView<'_>> {
        match self.dirty.get(&page_id) {
            Some(page) => Ok(PageView::Local(&**page)),
            None => Ok(PageView::Pinned(self.engine.pool.fetch_latest(page_id)?)),
        }
    }

    fn root_page_id(&self) -> Result<PageId> {
        Ok(MetaPage::root_page_id(&*self.meta()?))
    }
}

impl PageWrite for WriteTransaction {
    fn write_page(&mut self, page_id: PageId) -> Result<&mut PageBuf> {
        self.remember(page_id);
        if !self.dirty.contains_key(&page_id) {
            self.copy_on_write(page_id)?;
        }
        self.dirty
            .get_mut(&page_id)
            .map(|page| &mut **page)
            .ok_or_else(|| Error::corruption(format!("{} missing from write set", page_id)))
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        let head = MetaPage::free_list_head(&*self.meta()?);
        if let Some(head) = head {
            let next = FreePage::next(head, &*self.read_page(head)?)?;
            MetaPage::set_free_list_head(self.write_page(PageId::META)?, next);
            return Ok(head);
        }

        let page_count = MetaPage::page_count(&*self.meta()?);
        if let Some(limit) = self.engine.config.max_pages {
            if page_count >= limit {
                return Err(Error::OutOfSpace { page_count, limit });
            }
        }
        let page_id = PageId(page_count);
        self.engine.pool.claim(page_id, self.id)?;
        MetaPage::set_page_count(self.write_page(PageId::META)?, page_count + 1);
        self.remember(page_id);
        self.dirty.insert(page_id, zeroed_page());
        Ok(page_id)
    }

    fn free_page(&mut self, page_id: PageId) -> Result<()> {
        let head = MetaPage::free_list_head(&*self.meta()?);
        FreePage::init(self.write_page(page_id)?, head);
        MetaPage::set_free_list_head(self.write_page(PageId::META)?, Some(page_id));
        Ok(())
    }

    fn set_root_page_id(&mut self, root: PageId) -> Result<()> {
        MetaPage::set_root_page_id(self.write_page(PageId::META)?, root);
        Ok(())
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        if self.state.is_active() {
            self.abort();
        }
    }
}

/// Feed the entries of a range to `visit` until it returns `false`.
pub(crate) fn visit_range<P, F>(
    tree: &BTree<P>,
    low: Bound<&[u8]>,
    high: Bound<&[u8]>,
    visit: &mut F,
) -> Result<()>
where
    P: PageRead,
    F: FnMut(&[u8], &[u8]) -> bool,
{
    let scan: Scan<'_, P> = tree.scan_range(low, high)?;
    for entry in scan {
        let (key, value) = entry?;
        if !visit(&key, &value) {
            break;
        }
    }
    Ok(())
}
