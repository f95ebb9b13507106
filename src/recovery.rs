//! Recovery and crash resilience module.
//!
//! The log holds full images of every page a committed transaction changed,
//! so recovery is a single redo pass: copy each committed image newer than
//! the last checkpoint into the store. There is nothing to undo because
//! uncommitted pages never leave a transaction's private page set.

pub mod checkpoint;
pub mod redo;

// Re-export commonly used types
pub use checkpoint::{checkpoint, CheckpointStats};
pub use redo::{recover, recover_read_only, RecoveryStats};
