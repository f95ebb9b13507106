//! Snapshot readers.

use std::ops::Bound;
use std::sync::Arc;

use log::trace;

use super::write::visit_range;
use crate::access::{BTree, PageRead, PageView};
use crate::database::Engine;
use crate::error::Result;
use crate::storage::page::meta_page::MetaPage;
use crate::storage::page::PageId;
use crate::storage::wal::Lsn;

/// A read-only view of the store as of the last commit before it began.
///
/// Readers never wait for the writer. Page versions the snapshot can see
/// stay in the buffer pool until the transaction is dropped.
pub struct ReadTransaction {
    engine: Arc<Engine>,
    snapshot: Lsn,
}

impl ReadTransaction {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        let snapshot = engine.transactions.open_snapshot();
        trace!("Opened read snapshot at {}", snapshot);
        Self { engine, snapshot }
    }

    pub fn snapshot(&self) -> Lsn {
        self.snapshot
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let result = BTree::new(self).get(key);
        self.engine.observe(result)
    }

    /// Every entry with `low <= key <= high`.
    pub fn scan(&self, low: &[u8], high: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let result = BTree::new(self).scan(low, high);
        self.engine.observe(result)
    }

    /// Visit the entries between two bounds in key order until `visit`
    /// returns `false`.
    pub fn scan_with<F>(&self, low: Bound<&[u8]>, high: Bound<&[u8]>, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let tree = BTree::new(self);
        let result = visit_range(&tree, low, high, &mut visit);
        self.engine.observe(result)
    }
}

impl PageRead for ReadTransaction {
    fn read_page(&self, page_id: PageId) -> Result<PageView<'_>> {
        Ok(PageView::Pinned(
            self.engine.pool.fetch(page_id, self.snapshot)?,
        ))
    }

    fn root_page_id(&self) -> Result<PageId> {
        Ok(MetaPage::root_page_id(&*self.read_page(PageId::META)?))
    }
}

impl Drop for ReadTransaction {
    fn drop(&mut self) {
        let pool = &self.engine.pool;
        self.engine
            .transactions
            .close_snapshot(self.snapshot, |active| pool.prune(active));
        trace!("Closed read snapshot at {}", self.snapshot);
    }
}
