//! Write transaction IDs. They are stamped on every WAL frame, so a
//! reopened store continues numbering after the highest ID in its log.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

/// Hands out increasing IDs. ID 0 is never issued; it stands for "no
/// transaction yet" in an empty log.
pub struct TransactionIdGenerator {
    next_id: AtomicU64,
}

impl TransactionIdGenerator {
    pub fn starting_after(last: TransactionId) -> Self {
        Self {
            next_id: AtomicU64::new(last.value() + 1),
        }
    }

    pub fn next(&self) -> TransactionId {
        TransactionId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// The ID most recently handed out, or the one the generator was
    /// seeded with.
    pub fn last_issued(&self) -> TransactionId {
        TransactionId::new(self.next_id.load(Ordering::SeqCst).saturating_sub(1))
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::starting_after(TransactionId::default())
    }
}
