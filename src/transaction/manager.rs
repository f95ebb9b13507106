//! Transaction manager for coordinating transaction lifecycle.
//!
//! Two pieces of shared state live here. The writer gate admits one write
//! transaction at a time. The snapshot registry tracks the last committed
//! LSN and which snapshots readers still hold, so the buffer pool knows
//! which page versions to keep.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::{Condvar, Mutex};

use super::id::{TransactionId, TransactionIdGenerator};
use crate::error::{Error, Result};
use crate::storage::wal::Lsn;

#[derive(Debug, Default)]
struct SnapshotRegistry {
    last_committed: Lsn,
    /// Open snapshots and how many readers hold each.
    open: BTreeMap<Lsn, usize>,
}

impl SnapshotRegistry {
    fn active(&self) -> Vec<Lsn> {
        self.open.keys().copied().collect()
    }
}

/// The transaction manager hands out IDs, serializes writers and tracks
/// reader snapshots.
pub struct TransactionManager {
    /// Generator for unique transaction IDs.
    id_generator: TransactionIdGenerator,
    /// The write transaction currently holding the gate.
    writer: Mutex<Option<TransactionId>>,
    writer_released: Condvar,
    snapshots: Mutex<SnapshotRegistry>,
}

impl TransactionManager {
    /// Creates a manager whose first snapshot sees `last_committed`.
    pub fn new(last_committed: Lsn, last_transaction: TransactionId) -> Self {
        Self {
            id_generator: TransactionIdGenerator::starting_after(last_transaction),
            writer: Mutex::new(None),
            writer_released: Condvar::new(),
            snapshots: Mutex::new(SnapshotRegistry {
                last_committed,
                open: BTreeMap::new(),
            }),
        }
    }

    /// Wait for the writer gate, at most `wait` if given.
    pub fn begin_writer(&self, wait: Option<Duration>) -> Result<TransactionId> {
        let deadline = wait.map(|w| Instant::now() + w);
        let mut writer = self.writer.lock();
        while let Some(active) = *writer {
            match deadline {
                None => self.writer_released.wait(&mut writer),
                Some(deadline) => {
                    if self
                        .writer_released
                        .wait_until(&mut writer, deadline)
                        .timed_out()
                        && writer.is_some()
                    {
                        debug!("Gave up waiting for write transaction {}", active);
                        return Err(Error::TransactionConflict {
                            active: writer.unwrap_or(active),
                        });
                    }
                }
            }
        }
        let id = self.id_generator.next();
        *writer = Some(id);
        Ok(id)
    }

    /// Take the writer gate only if it is free.
    pub fn try_begin_writer(&self) -> Result<TransactionId> {
        let mut writer = self.writer.lock();
        if let Some(active) = *writer {
            return Err(Error::TransactionConflict { active });
        }
        let id = self.id_generator.next();
        *writer = Some(id);
        Ok(id)
    }

    /// Release the gate held by `id` and wake one waiting writer.
    pub fn end_writer(&self, id: TransactionId) {
        let mut writer = self.writer.lock();
        if *writer == Some(id) {
            *writer = None;
            self.writer_released.notify_one();
        }
    }

    pub fn active_writer(&self) -> Option<TransactionId> {
        *self.writer.lock()
    }

    /// Register a reader at the most recent commit.
    pub fn open_snapshot(&self) -> Lsn {
        let mut registry = self.snapshots.lock();
        let lsn = registry.last_committed;
        *registry.open.entry(lsn).or_insert(0) += 1;
        lsn
    }

    /// Unregister a reader. `release` runs with the remaining snapshots while
    /// no commit can slip in between.
    pub fn close_snapshot<F>(&self, lsn: Lsn, release: F)
    where
        F: FnOnce(&[Lsn]),
    {
        let mut registry = self.snapshots.lock();
        if let Some(count) = registry.open.get_mut(&lsn) {
            *count -= 1;
            if *count == 0 {
                registry.open.remove(&lsn);
            }
        }
        release(&registry.active());
    }

    /// Make a commit visible. `install` runs with the open snapshots before
    /// any new snapshot can observe `commit_lsn`.
    pub fn publish<F>(&self, commit_lsn: Lsn, install: F)
    where
        F: FnOnce(&[Lsn]),
    {
        let mut registry = self.snapshots.lock();
        install(&registry.active());
        registry.last_committed = commit_lsn;
    }

    pub fn last_committed(&self) -> Lsn {
        self.snapshots.lock().last_committed
    }

    pub fn active_snapshots(&self) -> Vec<Lsn> {
        self.snapshots.lock().active()
    }

    /// Returns the most recently issued transaction ID.
    pub fn last_transaction_id(&self) -> TransactionId {
        self.id_generator.last_issued()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(Lsn(0), TransactionId::new(0))
    }
}
