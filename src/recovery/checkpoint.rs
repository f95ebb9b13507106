//! Folding the log into the store.

use std::time::Instant;

use log::info;
use serde::Serialize;

use crate::error::Result;
use crate::storage::buffer::BufferPool;
use crate::storage::page::meta_page::MetaPage;
use crate::storage::page::PageId;
use crate::storage::wal::{Lsn, WalManager};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointStats {
    pub lsn: Lsn,
    pub pages_written: usize,
    /// Log bytes released by the reset.
    pub wal_bytes: u64,
}

/// Write every committed page to the store and empty the log.
///
/// The caller holds the writer gate, so the cache contains only committed
/// images and the log has nothing buffered. The meta page carrying the new
/// checkpoint LSN is written after all other pages are synced, and the log
/// is reset only after that, so a crash at any point leaves a store that
/// recovery can finish.
pub fn checkpoint(pool: &BufferPool, wal: &mut WalManager) -> Result<CheckpointStats> {
    let started = Instant::now();
    let lsn = wal.last_lsn();
    let wal_bytes = wal.size();

    pool.update_latest(PageId::META, |meta| MetaPage::set_checkpoint_lsn(meta, lsn))?;
    let pages_written = pool.flush_all()?;
    wal.reset(lsn)?;

    info!(
        "Checkpoint at {} wrote {} pages and released {} log bytes in {:?}",
        lsn,
        pages_written,
        wal_bytes,
        started.elapsed()
    );
    Ok(CheckpointStats {
        lsn,
        pages_written,
        wal_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvictionPolicy;
    use crate::storage::buffer::{replacer, InstallPage};
    use crate::storage::disk::PageStore;
    use crate::storage::page::{zeroed_page, PageType, PAGE_BODY_OFFSET};
    use crate::storage::wal::WalConfig;
    use crate::transaction::TransactionId;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_checkpoint_writes_pages_and_resets_log() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");
        let store = PageStore::create(&path)?;
        let pool = BufferPool::new(store, replacer::for_policy(EvictionPolicy::Clock), 16);
        let mut wal = WalManager::open(WalConfig::for_store(&path, false))?;

        let mut page = zeroed_page();
        PageType::Leaf.stamp(&mut page);
        page[PAGE_BODY_OFFSET + 100] = 77;
        wal.append(TransactionId::new(1), PageId(2), None, &page)?;
        let commit = wal.append_commit(TransactionId::new(1))?;
        wal.flush()?;
        pool.install(
            commit,
            vec![InstallPage {
                page_id: PageId(2),
                before: None,
                after: Arc::from(page),
            }],
            &[],
        );

        let stats = checkpoint(&pool, &mut wal)?;
        assert_eq!(stats.lsn, commit);
        assert_eq!(stats.pages_written, 2);
        assert_eq!(wal.base_lsn(), commit);
        assert!(wal.size() < stats.wal_bytes);
        assert_eq!(pool.stats().dirty, 0);

        let mut reopened = PageStore::open(&path, true)?;
        assert_eq!(reopened.read_raw(PageId(2))?[PAGE_BODY_OFFSET + 100], 77);
        assert_eq!(MetaPage::checkpoint_lsn(&*reopened.read_meta()?), commit);
        Ok(())
    }
}
