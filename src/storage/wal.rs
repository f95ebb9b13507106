//! Write-Ahead Logging (WAL) module.
//!
//! Each commit appends the full before and after image of every page the
//! transaction changed, followed by a commit marker. Recovery redoes the
//! after images of committed transactions and ignores everything else.

pub mod manager;
pub mod record;

pub use manager::{wal_path, Replay, WalConfig, WalManager, WalMark};
pub use record::{Lsn, PageRecord, WalRecord};
