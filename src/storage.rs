//! Storage layer implementation for burrowdb.
//!
//! This module provides the foundation for persistent data storage using a page-based
//! architecture. Key components:
//!
//! - **Page**: Fixed-size (4KB) blocks of data, the basic unit of I/O
//! - **PageStore**: Reads and writes checksummed pages of the store file
//! - **WalManager**: Logs page images of committed transactions before they reach the store
//! - **BufferPool**: In-memory cache of committed page versions with pluggable eviction
//!
//! Page images reach the store file only after the WAL holding them has
//! been flushed, through eviction or a checkpoint.

pub mod buffer;
pub mod disk;
pub mod page;
pub mod wal;

pub use buffer::{BufferPool, CacheStats, PageRef};
pub use disk::PageStore;
pub use page::{PageBuf, PageId, PAGE_SIZE};
pub use wal::{Lsn, WalManager};
