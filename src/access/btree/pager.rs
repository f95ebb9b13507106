//! How the tree reaches its pages.
//!
//! A read transaction serves pinned versions from the buffer pool. A write
//! transaction serves its own modified copies first and falls back to the
//! newest committed versions.

use std::ops::Deref;

use crate::error::Result;
use crate::storage::buffer::PageRef;
use crate::storage::page::{PageBuf, PageId};

/// A page handed to the tree for reading.
pub enum PageView<'a> {
    /// Committed version pinned in the buffer pool.
    Pinned(PageRef<'a>),
    /// Private copy owned by a write transaction.
    Local(&'a PageBuf),
}

impl Deref for PageView<'_> {
    type Target = PageBuf;

    fn deref(&self) -> &Self::Target {
        match self {
            PageView::Pinned(page) => &**page,
            PageView::Local(page) => *page,
        }
    }
}

pub trait PageRead {
    fn read_page(&self, page_id: PageId) -> Result<PageView<'_>>;

    fn root_page_id(&self) -> Result<PageId>;
}

pub trait PageWrite: PageRead {
    /// Mutable access to a page, copying it into the writer's private set on
    /// first touch.
    fn write_page(&mut self, page_id: PageId) -> Result<&mut PageBuf>;

    /// Hand out a page from the free list, or extend the store.
    fn allocate_page(&mut self) -> Result<PageId>;

    fn free_page(&mut self, page_id: PageId) -> Result<()>;

    fn set_root_page_id(&mut self, root: PageId) -> Result<()>;
}

impl<T: PageRead + ?Sized> PageRead for &T {
    fn read_page(&self, page_id: PageId) -> Result<PageView<'_>> {
        (**self).read_page(page_id)
    }

    fn root_page_id(&self) -> Result<PageId> {
        (**self).root_page_id()
    }
}

impl<T: PageRead + ?Sized> PageRead for &mut T {
    fn read_page(&self, page_id: PageId) -> Result<PageView<'_>> {
        (**self).read_page(page_id)
    }

    fn root_page_id(&self) -> Result<PageId> {
        (**self).root_page_id()
    }
}

impl<T: PageWrite + ?Sized> PageWrite for &mut T {
    fn write_page(&mut self, page_id: PageId) -> Result<&mut PageBuf> {
        (**self).write_page(page_id)
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        (**self).allocate_page()
    }

    fn free_page(&mut self, page_id: PageId) -> Result<()> {
        (**self).free_page(page_id)
    }

    fn set_root_page_id(&mut self, root: PageId) -> Result<()> {
        (**self).set_root_page_id(root)
    }
}
