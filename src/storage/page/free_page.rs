//! Pages on the free list. Each one points at the next free page.

use crate::error::{Error, Result};
use crate::storage::page::{read_u64, write_u64, PageBuf, PageId, PageType, PAGE_BODY_OFFSET};

const NEXT_OFFSET: usize = PAGE_BODY_OFFSET + 7;

pub struct FreePage;

impl FreePage {
    pub fn init(data: &mut PageBuf, next: Option<PageId>) {
        data.fill(0);
        PageType::Free.stamp(data);
        write_u64(data, NEXT_OFFSET, PageId::to_raw(next));
    }

    pub fn next(page_id: PageId, data: &PageBuf) -> Result<Option<PageId>> {
        if PageType::of(data)? != PageType::Free {
            return Err(Error::corruption(format!(
                "free list points at {} which is not a free page",
                page_id
            )));
        }
        Ok(PageId::from_raw(read_u64(data, NEXT_OFFSET)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::zeroed_page;

    #[test]
    fn test_free_page_chain() {
        let mut page = zeroed_page();
        FreePage::init(&mut page, Some(PageId(12)));
        assert_eq!(FreePage::next(PageId(3), &page).unwrap(), Some(PageId(12)));

        FreePage::init(&mut page, None);
        assert_eq!(FreePage::next(PageId(3), &page).unwrap(), None);
    }

    #[test]
    fn test_non_free_page_is_corruption() {
        let mut page = zeroed_page();
        PageType::Leaf.stamp(&mut page);
        assert!(FreePage::next(PageId(3), &page).is_err());
    }
}
