use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::access::{BTree, PageRead, TreeStats};
use crate::config::{OpenMode, StoreConfig};
use crate::error::{Error, Result};
use crate::recovery::{self, CheckpointStats, RecoveryStats};
use crate::storage::buffer::{replacer, InstallPage};
use crate::storage::page::free_page::FreePage;
use crate::storage::page::meta_page::MetaPage;
use crate::storage::page::PageId;
use crate::storage::wal::{wal_path, Lsn, WalConfig};
use crate::storage::{BufferPool, CacheStats, PageStore, WalManager};
use crate::transaction::{ReadTransaction, TransactionId, TransactionManager, WriteTransaction};

/// State shared by every handle and transaction of one open store.
pub(crate) struct Engine {
    pub(crate) config: StoreConfig,
    path: PathBuf,
    pub(crate) pool: BufferPool,
    /// `None` when the store is read-only.
    wal: Option<Mutex<WalManager>>,
    pub(crate) transactions: TransactionManager,
    /// Set once corruption has been seen. New writers are refused from then on.
    poisoned: AtomicBool,
    recovery: RecoveryStats,
}

impl Engine {
    pub(crate) fn wal(&self) -> Result<&Mutex<WalManager>> {
        self.wal.as_ref().ok_or(Error::ReadOnly)
    }

    /// Pass `result` through, poisoning the engine if it reports corruption.
    pub(crate) fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_corruption() && !self.poisoned.swap(true, Ordering::SeqCst) {
                error!(
                    "{} is corrupt, refusing further writes: {}",
                    self.path.display(),
                    e
                );
            }
        }
        result
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.wal.is_none() {
            return Err(Error::ReadOnly);
        }
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(Error::corruption(format!(
                "{} was found corrupt earlier, reopen it to run recovery",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Checkpoint while the caller holds the writer gate.
    fn checkpoint_held(&self) -> Result<CheckpointStats> {
        let mut wal = self.wal()?.lock();
        let result = recovery::checkpoint(&self.pool, &mut wal);
        self.observe(result)
    }

    /// Run a checkpoint once the log has grown past the configured size.
    /// Called by a committing writer that still holds the gate.
    pub(crate) fn checkpoint_if_needed(&self) {
        let threshold = self.config.checkpoint_wal_bytes;
        let Some(wal) = self.wal.as_ref() else {
            return;
        };
        if threshold == 0 || wal.lock().size() <= threshold {
            return;
        }
        if let Err(e) = self.checkpoint_held() {
            warn!("Automatic checkpoint failed: {}", e);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Dirty pages not yet checkpointed are still in the log and are
        // redone at the next open.
        debug!(
            "Closing {} with {} dirty pages",
            self.path.display(),
            self.pool.stats().dirty
        );
    }
}

/// Counters describing an open store.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub path: PathBuf,
    pub read_only: bool,
    pub poisoned: bool,
    pub last_committed: Lsn,
    pub active_writer: Option<TransactionId>,
    pub open_snapshots: usize,
    pub wal_bytes: u64,
    pub cache: CacheStats,
    pub recovery: RecoveryStats,
}

/// Result of a full consistency check.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub tree: TreeStats,
    pub page_count: u64,
    pub free_pages: u64,
    /// Pages neither in the tree nor on the free list.
    pub unreachable_pages: u64,
}

/// High-level store interface that integrates all layers.
///
/// Handles are cheap to clone and share one engine. Separate stores opened
/// from different paths are independent.
#[derive(Clone)]
pub struct Database {
    engine: Arc<Engine>,
}

impl Database {
    /// Create a new store at the specified path.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(Error::Config(format!(
                "store already exists at {}",
                path.display()
            )));
        }
        Self::open_with(path, StoreConfig::default())
    }

    /// Open an existing store for reading and writing.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(
            path,
            StoreConfig {
                mode: OpenMode::ReadWrite,
                ..StoreConfig::default()
            },
        )
    }

    pub fn open_with(path: &Path, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let exists = path.exists();
        if !exists && config.mode != OpenMode::Create {
            return Err(Error::Config(format!(
                "store does not exist at {}",
                path.display()
            )));
        }

        let engine = match config.mode {
            OpenMode::ReadOnly => Self::open_read_only(path, config)?,
            OpenMode::ReadWrite | OpenMode::Create => {
                if !exists {
                    Self::bootstrap(path)?;
                }
                Self::open_read_write(path, config)?
            }
        };
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    /// Lay down an empty store. A log left behind by an earlier store of the
    /// same name would replay foreign pages, so it is removed.
    fn bootstrap(path: &Path) -> Result<()> {
        drop(PageStore::create(path)?);
        let wal = wal_path(path);
        if wal.exists() {
            warn!("Removing stale log {} for new store", wal.display());
            std::fs::remove_file(&wal)?;
        }
        info!("Created store {}", path.display());
        Ok(())
    }

    fn open_read_write(path: &Path, config: StoreConfig) -> Result<Engine> {
        let mut store = PageStore::open(path, false)?;
        let mut wal = WalManager::open(WalConfig::for_store(path, config.sync_on_commit))?;
        let recovery = recovery::recover(&mut store, &mut wal)?;

        let pool = BufferPool::new(
            store,
            replacer::for_policy(config.eviction),
            config.cache_capacity,
        );
        info!(
            "Opened {} at {} ({} page cache)",
            path.display(),
            recovery.end_lsn,
            config.cache_capacity
        );
        Ok(Engine {
            transactions: TransactionManager::new(recovery.end_lsn, recovery.last_transaction),
            config,
            path: path.to_path_buf(),
            pool,
            wal: Some(Mutex::new(wal)),
            poisoned: AtomicBool::new(false),
            recovery,
        })
    }

    /// Committed work still in the log is served from the cache, since
    /// neither file may be written.
    fn open_read_only(path: &Path, config: StoreConfig) -> Result<Engine> {
        let mut store = PageStore::open(path, true)?;
        let (recovery, records) = recovery::recover_read_only(&mut store)?;

        let pool = BufferPool::new(
            store,
            replacer::for_policy(config.eviction),
            config.cache_capacity,
        );
        if !records.is_empty() {
            let pages = records
                .into_iter()
                .map(|record| InstallPage {
                    page_id: record.page_id,
                    before: None,
                    after: Arc::from(record.after),
                })
                .collect();
            pool.install(recovery.end_lsn, pages, &[]);
        }
        info!("Opened {} read-only at {}", path.display(), recovery.end_lsn);
        Ok(Engine {
            transactions: TransactionManager::new(recovery.end_lsn, recovery.last_transaction),
            config,
            path: path.to_path_buf(),
            pool,
            wal: None,
            poisoned: AtomicBool::new(false),
            recovery,
        })
    }

    /// Start the write transaction, waiting for the current one to finish.
    pub fn begin(&self) -> Result<WriteTransaction> {
        self.engine.ensure_writable()?;
        let id = self
            .engine
            .transactions
            .begin_writer(self.engine.config.writer_wait())?;
        Ok(WriteTransaction::new(Arc::clone(&self.engine), id))
    }

    /// Start the write transaction only if no other one is active.
    pub fn try_begin(&self) -> Result<WriteTransaction> {
        self.engine.ensure_writable()?;
        let id = self.engine.transactions.try_begin_writer()?;
        Ok(WriteTransaction::new(Arc::clone(&self.engine), id))
    }

    /// Open a read snapshot at the last commit.
    pub fn read(&self) -> Result<ReadTransaction> {
        Ok(ReadTransaction::new(Arc::clone(&self.engine)))
    }

    /// Run `f` in a write transaction. It commits if `f` succeeds and rolls
    /// back otherwise.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut WriteTransaction) -> Result<T>,
    {
        let mut txn = self.begin()?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                drop(txn);
                Err(e)
            }
        }
    }

    /// Run `f` against a read snapshot.
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ReadTransaction) -> Result<T>,
    {
        let txn = self.read()?;
        f(&txn)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.view(|txn| txn.get(key))
    }

    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        self.update(|txn| txn.insert(key, value))
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.update(|txn| txn.delete(key))
    }

    /// Fold the log into the store file.
    pub fn checkpoint(&self) -> Result<CheckpointStats> {
        self.engine.ensure_writable()?;
        let id = self
            .engine
            .transactions
            .begin_writer(self.engine.config.writer_wait())?;
        let result = self.engine.checkpoint_held();
        self.engine.transactions.end_writer(id);
        result
    }

    pub fn stats(&self) -> DatabaseStats {
        let engine = &self.engine;
        DatabaseStats {
            path: engine.path.clone(),
            read_only: engine.wal.is_none(),
            poisoned: engine.poisoned.load(Ordering::SeqCst),
            last_committed: engine.transactions.last_committed(),
            active_writer: engine.transactions.active_writer(),
            open_snapshots: engine.transactions.active_snapshots().len(),
            wal_bytes: engine.wal.as_ref().map(|w| w.lock().size()).unwrap_or(0),
            cache: engine.pool.stats(),
            recovery: engine.recovery.clone(),
        }
    }

    /// Check the tree structure and page accounting at the last commit.
    pub fn verify(&self) -> Result<VerifyReport> {
        let txn = self.read()?;
        let result = Self::verify_snapshot(&txn);
        self.engine.observe(result)
    }

    fn verify_snapshot(txn: &ReadTransaction) -> Result<VerifyReport> {
        let tree = BTree::new(txn).verify()?;
        let meta = txn.read_page(PageId::META)?;
        let page_count = MetaPage::page_count(&meta);

        let mut free_pages = 0u64;
        let mut next = MetaPage::free_list_head(&meta);
        while let Some(page_id) = next {
            if page_id.0 >= page_count || free_pages >= page_count {
                return Err(Error::corruption(format!(
                    "free list runs past {} pages at {}",
                    page_count, page_id
                )));
            }
            free_pages += 1;
            next = FreePage::next(page_id, &*txn.read_page(page_id)?)?;
        }

        let used = 1 + (tree.leaf_pages + tree.internal_pages) as u64 + free_pages;
        if used > page_count {
            return Err(Error::corruption(format!(
                "{} pages in use but the store holds {}",
                used, page_count
            )));
        }
        Ok(VerifyReport {
            tree,
            page_count,
            free_pages,
            unreachable_pages: page_count - used,
        })
    }

    pub fn path(&self) -> &Path {
        &self.engine.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.engine.config
    }

    pub fn is_read_only(&self) -> bool {
        self.engine.wal.is_none()
    }

    /// Checkpoint and release this handle.
    pub fn close(self) -> Result<()> {
        if !self.is_read_only() {
            self.checkpoint()?;
        }
        Ok(())
    }
}
