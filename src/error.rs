//! Error types shared by every layer of the engine.

use thiserror::Error;

use crate::storage::page::PageId;
use crate::transaction::{TransactionId, TransactionState};

/// `ENOSPC` on Linux and macOS.
const ENOSPC: i32 = 28;

/// Errors that can occur anywhere in the engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(std::io::Error),

    /// The store reached its configured `max_pages`.
    #[error("Out of space: store holds {page_count} pages (limit: {limit})")]
    OutOfSpace { page_count: u64, limit: u64 },

    /// The file system reported `ENOSPC` while writing the store or the log.
    #[error("Out of space: device is full: {0}")]
    DeviceFull(std::io::Error),

    #[error("Page {page_id} is held by {owner}, cannot be modified by {requester}")]
    ConcurrentModification {
        page_id: PageId,
        owner: TransactionId,
        requester: TransactionId,
    },

    #[error("Write transaction {active} is already active")]
    TransactionConflict { active: TransactionId },

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Transaction {id} is in invalid state: {state}")]
    InvalidState {
        id: TransactionId,
        state: TransactionState,
    },

    #[error("Key is too large: {size} bytes (max: {max})")]
    KeyTooLarge { size: usize, max: usize },

    #[error("Entry is too large: {size} bytes (max: {max})")]
    EntryTooLarge { size: usize, max: usize },

    #[error("Store is opened read-only")]
    ReadOnly,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// True for errors after which the store must stop accepting writes.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    /// True for both the page limit and a full device.
    pub fn is_out_of_space(&self) -> bool {
        matches!(self, Error::OutOfSpace { .. } | Error::DeviceFull(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.raw_os_error() == Some(ENOSPC) {
            return Error::DeviceFull(err);
        }
        Error::Io(err)
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
