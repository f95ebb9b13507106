//! Access layer for ordered key/value storage.
//!
//! This module provides the B+Tree that maps byte keys to byte values:
//!
//! - **BTree**: Lookups, upserts, deletes and range scans with split/merge rebalancing
//! - **Scan**: Lazy range iterator that follows the leaf chain
//! - **PageRead / PageWrite**: The page source a tree runs against, either a
//!   snapshot of committed pages or a write transaction's private copies
//!
//! The access layer never touches the store or the WAL directly; durability
//! and isolation come from the page source it is given.

pub mod btree;

pub use btree::iterator::Scan;
pub use btree::{BTree, PageRead, PageView, PageWrite, TreeStats};
