//! burrowdb is an embeddable key/value store built from a checksummed page
//! file, a write-ahead log of page images, a versioned buffer cache and a
//! B+Tree. One write transaction runs at a time next to any number of
//! snapshot readers.

pub mod access;
pub mod config;
pub mod database;
pub mod error;
pub mod recovery;
pub mod storage;
pub mod transaction;

pub use config::StoreConfig;
pub use database::{Database, DatabaseStats, VerifyReport};
pub use error::{Error, Result};
pub use transaction::{ReadTransaction, WriteTransaction};
