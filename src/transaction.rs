//! Transaction management module.
//!
//! One write transaction runs at a time and works on private copies of the
//! pages it changes. Any number of read transactions run alongside it, each
//! pinned to the last commit that preceded it.

pub mod id;
pub mod manager;
pub mod read;
pub mod state;
pub mod write;

// Re-export commonly used types
pub use id::{TransactionId, TransactionIdGenerator};
pub use manager::TransactionManager;
pub use read::ReadTransaction;
pub use state::TransactionState;
pub use write::WriteTransaction;
