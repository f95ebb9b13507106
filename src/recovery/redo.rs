//! Redo of committed page images at open.

use log::{debug, info};
use serde::Serialize;

use crate::error::Result;
use crate::storage::disk::PageStore;
use crate::storage::page::meta_page::MetaPage;
use crate::storage::wal::{wal_path, Lsn, PageRecord, Replay, WalManager};
use crate::transaction::TransactionId;

/// What recovery found in the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStats {
    /// Page images copied into the store (or the cache, when read-only).
    pub pages_redone: usize,
    /// Images at or below the checkpoint LSN, already in the store.
    pub pages_skipped: usize,
    pub committed_transactions: usize,
    /// Transactions with page images but no commit marker.
    pub discarded_transactions: usize,
    pub torn_tail: bool,
    /// LSN the store reflects once recovery is done.
    pub end_lsn: Lsn,
    /// Highest transaction ID found in the log.
    pub last_transaction: TransactionId,
}

impl RecoveryStats {
    fn from_replay(replay: &Replay, checkpoint_lsn: Lsn) -> Self {
        let last_transaction = replay
            .records
            .iter()
            .map(|r| r.transaction_id)
            .max()
            .unwrap_or(TransactionId::new(0));
        RecoveryStats {
            pages_redone: 0,
            pages_skipped: 0,
            committed_transactions: replay.committed,
            discarded_transactions: replay.discarded,
            torn_tail: replay.torn_tail,
            end_lsn: replay.last_lsn.max(checkpoint_lsn),
            last_transaction,
        }
    }

    fn log_summary(&self) {
        if self.pages_redone > 0 || self.discarded_transactions > 0 || self.torn_tail {
            info!(
                "Recovery redid {} pages from {} committed transactions, discarded {} incomplete ({} pages already checkpointed)",
                self.pages_redone,
                self.committed_transactions,
                self.discarded_transactions,
                self.pages_skipped
            );
        } else {
            debug!("Recovery found nothing to redo, store is at {}", self.end_lsn);
        }
    }
}

/// Bring the store up to date with the log, then empty the log.
///
/// Redo writes whole page images, so running it again after a crash part
/// way through gives the same result.
pub fn recover(store: &mut PageStore, wal: &mut WalManager) -> Result<RecoveryStats> {
    let replay = wal.replay()?;
    let checkpoint_lsn = MetaPage::checkpoint_lsn(&*store.read_meta()?);
    let mut stats = RecoveryStats::from_replay(&replay, checkpoint_lsn);
    stats.end_lsn = stats.end_lsn.max(wal.base_lsn());

    for record in &replay.records {
        if record.lsn <= checkpoint_lsn {
            stats.pages_skipped += 1;
            continue;
        }
        store.write_raw(record.page_id, &record.after)?;
        stats.pages_redone += 1;
    }

    let log_has_frames = replay.committed > 0 || replay.discarded > 0 || replay.torn_tail;
    if stats.pages_redone > 0 || stats.end_lsn > checkpoint_lsn {
        store.sync()?;
        store.set_checkpoint_lsn(stats.end_lsn)?;
    }
    if log_has_frames || wal.base_lsn() < stats.end_lsn {
        wal.reset(stats.end_lsn)?;
    }

    stats.log_summary();
    Ok(stats)
}

/// Read the log of a store opened read-only without touching either file.
/// The returned images belong in the buffer pool, newest last.
pub fn recover_read_only(store: &mut PageStore) -> Result<(RecoveryStats, Vec<PageRecord>)> {
    let checkpoint_lsn = MetaPage::checkpoint_lsn(&*store.read_meta()?);
    let Some(replay) = WalManager::replay_file(&wal_path(store.path()))? else {
        return Ok((
            RecoveryStats {
                end_lsn: checkpoint_lsn,
                ..RecoveryStats::default()
            },
            Vec::new(),
        ));
    };

    let mut stats = RecoveryStats::from_replay(&replay, checkpoint_lsn);
    let mut pages = Vec::new();
    for record in replay.records {
        if record.lsn <= checkpoint_lsn {
            stats.pages_skipped += 1;
        } else {
            stats.pages_redone += 1;
            pages.push(record);
        }
    }

    stats.log_summary();
    Ok((stats, pages))
}
