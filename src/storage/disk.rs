//! Block I/O over the backing store file.

pub mod page_store;

pub use page_store::PageStore;
