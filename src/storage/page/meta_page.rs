//! Store metadata kept in page 0.
//!
//! Layout after the common page header:
//!
//! | offset | size | field            |
//! |--------|------|------------------|
//! | 16     | 8    | magic `BURROWDB` |
//! | 24     | 4    | format version   |
//! | 28     | 4    | page size        |
//! | 32     | 8    | page count       |
//! | 40     | 8    | free-list head   |
//! | 48     | 8    | root page id     |
//! | 56     | 8    | checkpoint LSN   |

use crate::error::{Error, Result};
use crate::storage::page::{
    read_u32, read_u64, write_u32, write_u64, PageBuf, PageId, PageType, PAGE_SIZE,
};
use crate::storage::wal::Lsn;

pub const MAGIC: &[u8; 8] = b"BURROWDB";
pub const FORMAT_VERSION: u32 = 1;

const MAGIC_OFFSET: usize = 16;
const VERSION_OFFSET: usize = 24;
const PAGE_SIZE_OFFSET: usize = 28;
const PAGE_COUNT_OFFSET: usize = 32;
const FREE_HEAD_OFFSET: usize = 40;
const ROOT_OFFSET: usize = 48;
const CHECKPOINT_LSN_OFFSET: usize = 56;

/// Typed view over the meta page bytes.
pub struct MetaPage;

impl MetaPage {
    pub fn init(data: &mut PageBuf, root: PageId) {
        data.fill(0);
        PageType::Meta.stamp(data);
        data[MAGIC_OFFSET..MAGIC_OFFSET + 8].copy_from_slice(MAGIC);
        write_u32(data, VERSION_OFFSET, FORMAT_VERSION);
        write_u32(data, PAGE_SIZE_OFFSET, PAGE_SIZE as u32);
        write_u64(data, PAGE_COUNT_OFFSET, root.0 + 1);
        write_u64(data, FREE_HEAD_OFFSET, PageId::NONE_RAW);
        write_u64(data, ROOT_OFFSET, root.0);
        write_u64(data, CHECKPOINT_LSN_OFFSET, 0);
    }

    pub fn validate(data: &PageBuf) -> Result<()> {
        if PageType::of(data)? != PageType::Meta || &data[MAGIC_OFFSET..MAGIC_OFFSET + 8] != MAGIC
        {
            return Err(Error::corruption("page 0 is not a burrowdb meta page"));
        }
        let version = read_u32(data, VERSION_OFFSET);
        if version != FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "unsupported format version {}",
                version
            )));
        }
        let page_size = read_u32(data, PAGE_SIZE_OFFSET) as usize;
        if page_size != PAGE_SIZE {
            return Err(Error::corruption(format!(
                "store page size {} does not match engine page size {}",
                page_size, PAGE_SIZE
            )));
        }
        let page_count = Self::page_count(data);
        let root = Self::root_page_id(data);
        if root.0 == 0 || root.0 >= page_count {
            return Err(Error::corruption(format!(
                "root {} outside of {} pages",
                root, page_count
            )));
        }
        Ok(())
    }

    pub fn page_count(data: &PageBuf) -> u64 {
        read_u64(data, PAGE_COUNT_OFFSET)
    }

    pub fn set_page_count(data: &mut PageBuf, count: u64) {
        write_u64(data, PAGE_COUNT_OFFSET, count);
    }

    pub fn free_list_head(data: &PageBuf) -> Option<PageId> {
        PageId::from_raw(read_u64(data, FREE_HEAD_OFFSET))
    }

    pub fn set_free_list_head(data: &mut PageBuf, head: Option<PageId>) {
        write_u64(data, FREE_HEAD_OFFSET, PageId::to_raw(head));
    }

    pub fn root_page_id(data: &PageBuf) -> PageId {
        PageId(read_u64(data, ROOT_OFFSET))
    }

    pub fn set_root_page_id(data: &mut PageBuf, root: PageId) {
        write_u64(data, ROOT_OFFSET, root.0);
    }

    pub fn checkpoint_lsn(data: &PageBuf) -> Lsn {
        Lsn(read_u64(data, CHECKPOINT_LSN_OFFSET))
    }

    pub fn set_checkpoint_lsn(data: &mut PageBuf, lsn: Lsn) {
        write_u64(data, CHECKPOINT_LSN_OFFSET, lsn.0);
    }
}
