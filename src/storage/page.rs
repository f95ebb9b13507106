pub mod btree_internal_page;
pub mod btree_leaf_page;
pub mod free_page;
pub mod meta_page;

use std::fmt;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};

pub const PAGE_SIZE: usize = 4096;

/// Raw contents of one page.
pub type PageBuf = [u8; PAGE_SIZE];

// Every page starts with a checksum followed by its type tag.
pub const CHECKSUM_OFFSET: usize = 0;
pub const PAGE_TYPE_OFFSET: usize = 8;
/// First byte available to a page format after the common header.
pub const PAGE_BODY_OFFSET: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

impl PageId {
    /// Page 0 holds the store metadata.
    pub const META: PageId = PageId(0);

    /// Encoded form of "no page" in on-page pointers.
    pub const NONE_RAW: u64 = 0;

    /// Decode an on-page pointer where 0 means absent. Page 0 is never a
    /// valid target for such a pointer.
    pub fn from_raw(raw: u64) -> Option<PageId> {
        if raw == Self::NONE_RAW {
            None
        } else {
            Some(PageId(raw))
        }
    }

    pub fn to_raw(page_id: Option<PageId>) -> u64 {
        page_id.map(|p| p.0).unwrap_or(Self::NONE_RAW)
    }

    pub fn offset(self) -> u64 {
        self.0 * PAGE_SIZE as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Never written.
    Unused = 0,
    Meta = 1,
    Leaf = 2,
    Internal = 3,
    Free = 4,
}

impl PageType {
    pub fn of(data: &PageBuf) -> Result<Self> {
        match data[PAGE_TYPE_OFFSET] {
            0 => Ok(PageType::Unused),
            1 => Ok(PageType::Meta),
            2 => Ok(PageType::Leaf),
            3 => Ok(PageType::Internal),
            4 => Ok(PageType::Free),
            other => Err(Error::corruption(format!("unknown page type tag {}", other))),
        }
    }

    pub fn stamp(self, data: &mut PageBuf) {
        data[PAGE_TYPE_OFFSET] = self as u8;
    }
}

pub fn zeroed_page() -> Box<PageBuf> {
    Box::new([0u8; PAGE_SIZE])
}

pub fn compute_checksum(data: &PageBuf) -> u64 {
    xxh3_64(&data[PAGE_TYPE_OFFSET..])
}

pub fn stored_checksum(data: &PageBuf) -> u64 {
    read_u64(data, CHECKSUM_OFFSET)
}

pub fn stamp_checksum(data: &mut PageBuf) {
    let checksum = compute_checksum(data);
    write_u64(data, CHECKSUM_OFFSET, checksum);
}

/// Verify a page read from disk. A page of all zeros is a hole left by
/// out-of-order extension and is accepted as unused.
pub fn verify_checksum(page_id: PageId, data: &PageBuf) -> Result<()> {
    let stored = stored_checksum(data);
    if stored == compute_checksum(data) {
        return Ok(());
    }
    if stored == 0 && data.iter().all(|&b| b == 0) {
        return Ok(());
    }
    Err(Error::corruption(format!(
        "checksum mismatch on {}: stored {:#018x}",
        page_id, stored
    )))
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

pub(crate) fn write_u16(data: &mut [u8], offset: usize, val: u16) {
    data[offset..offset + 2].copy_from_slice(&val.to_le_bytes());
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn write_u32(data: &mut [u8], offset: usize, val: u32) {
    data[offset..offset + 4].copy_from_slice(&val.to_le_bytes());
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn write_u64(data: &mut [u8], offset: usize, val: u64) {
    data[offset..offset + 8].copy_from_slice(&val.to_le_bytes());
}
