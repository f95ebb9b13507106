//! B+Tree internal node format.
//!
//! Layout after the common page header:
//!
//! | offset | size | field        |
//! |--------|------|--------------|
//! | 10     | 2    | key count    |
//! | 12     | 8    | first child  |
//! | 20     | ...  | entries      |
//!
//! Each entry is `key_len u16 | key | child u64`. `keys[i]` is the smallest
//! key reachable through `children[i + 1]`.

use super::btree_leaf_page::{weighted_median, MIN_FILL, NODE_CAPACITY, NODE_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::storage::page::{
    read_u16, read_u64, write_u16, write_u64, PageBuf, PageId, PageType, PAGE_SIZE,
};

const COUNT_OFFSET: usize = 10;
const FIRST_CHILD_OFFSET: usize = 12;

pub fn key_entry_size(key: &[u8]) -> usize {
    2 + key.len() + 8
}

/// Decoded internal node. Always holds `keys.len() + 1` children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeInternalPage {
    pub keys: Vec<Vec<u8>>,
    pub children: Vec<PageId>,
}

impl BTreeInternalPage {
    /// A new root above two nodes produced by a split.
    pub fn new_root(left: PageId, separator: Vec<u8>, right: PageId) -> Self {
        Self {
            keys: vec![separator],
            children: vec![left, right],
        }
    }

    pub fn from_page(page_id: PageId, data: &PageBuf) -> Result<Self> {
        if PageType::of(data)? != PageType::Internal {
            return Err(Error::corruption(format!(
                "{} is not an internal page",
                page_id
            )));
        }
        let count = read_u16(data, COUNT_OFFSET) as usize;
        let first_child = read_u64(data, FIRST_CHILD_OFFSET);

        let mut keys = Vec::with_capacity(count);
        let mut children = Vec::with_capacity(count + 1);
        children.push(PageId(first_child));

        let mut pos = NODE_HEADER_SIZE;
        for _ in 0..count {
            if pos + 2 > PAGE_SIZE {
                return Err(Self::overrun(page_id));
            }
            let key_len = read_u16(data, pos) as usize;
            pos += 2;
            if pos + key_len + 8 > PAGE_SIZE {
                return Err(Self::overrun(page_id));
            }
            keys.push(data[pos..pos + key_len].to_vec());
            pos += key_len;
            children.push(PageId(read_u64(data, pos)));
            pos += 8;
        }

        if children.iter().any(|c| c.0 == 0) {
            return Err(Error::corruption(format!(
                "internal {} points at the meta page",
                page_id
            )));
        }

        Ok(Self { keys, children })
    }

    fn overrun(page_id: PageId) -> Error {
        Error::corruption(format!("internal {} entries overrun the page", page_id))
    }

    pub fn write_to(&self, data: &mut PageBuf) {
        debug_assert!(!self.overflows());
        debug_assert_eq!(self.children.len(), self.keys.len() + 1);
        data.fill(0);
        PageType::Internal.stamp(data);
        write_u16(data, COUNT_OFFSET, self.keys.len() as u16);
        write_u64(data, FIRST_CHILD_OFFSET, self.children[0].0);

        let mut pos = NODE_HEADER_SIZE;
        for (key, child) in self.keys.iter().zip(&self.children[1..]) {
            write_u16(data, pos, key.len() as u16);
            pos += 2;
            data[pos..pos + key.len()].copy_from_slice(key);
            pos += key.len();
            write_u64(data, pos, child.0);
            pos += 8;
        }
    }

    pub fn payload_size(&self) -> usize {
        self.keys.iter().map(|k| key_entry_size(k)).sum()
    }

    pub fn overflows(&self) -> bool {
        self.payload_size() > NODE_CAPACITY
    }

    pub fn underflows(&self) -> bool {
        self.keys.is_empty() || self.payload_size() < MIN_FILL
    }

    /// Index of the child whose subtree may contain `key`.
    pub fn child_index(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|k| k.as_slice() <= key)
    }

    pub fn child(&self, index: usize) -> PageId {
        self.children[index]
    }

    /// Record that `children[index]` split and `right` now follows it.
    pub fn insert_split(&mut self, index: usize, separator: Vec<u8>, right: PageId) {
        self.keys.insert(index, separator);
        self.children.insert(index + 1, right);
    }

    /// Drop the separator at `index` together with `children[index + 1]`.
    pub fn remove_right_of(&mut self, index: usize) -> (Vec<u8>, PageId) {
        let key = self.keys.remove(index);
        let child = self.children.remove(index + 1);
        (key, child)
    }

    /// Split around a byte-weighted median key, which moves up to the parent.
    pub fn split(&mut self) -> (Vec<u8>, BTreeInternalPage) {
        let sizes: Vec<usize> = self.keys.iter().map(|k| key_entry_size(k)).collect();
        let mid = promote_index(&sizes);
        let right_keys = self.keys.split_off(mid + 1);
        let promoted = self.keys.remove(mid);
        let right_children = self.children.split_off(mid + 1);
        (
            promoted,
            BTreeInternalPage {
                keys: right_keys,
                children: right_children,
            },
        )
    }

    pub fn can_merge_with(&self, separator: &[u8], right: &BTreeInternalPage) -> bool {
        self.payload_size() + key_entry_size(separator) + right.payload_size() <= NODE_CAPACITY
    }

    /// Absorb the right sibling, pulling the separator down between them.
    pub fn merge_with(&mut self, separator: Vec<u8>, right: BTreeInternalPage) {
        self.keys.push(separator);
        self.keys.extend(right.keys);
        self.children.extend(right.children);
    }

    /// Even out two siblings that cannot be merged. Returns the new separator.
    pub fn redistribute_with(
        &mut self,
        separator: Vec<u8>,
        right: &mut BTreeInternalPage,
    ) -> Vec<u8> {
        let mut keys = std::mem::take(&mut self.keys);
        keys.push(separator);
        keys.append(&mut right.keys);
        let mut children = std::mem::take(&mut self.children);
        children.append(&mut right.children);

        let sizes: Vec<usize> = keys.iter().map(|k| key_entry_size(k)).collect();
        let mid = promote_index(&sizes);

        right.keys = keys.split_off(mid + 1);
        let promoted = keys.remove(mid);
        right.children = children.split_off(mid + 1);
        self.keys = keys;
        self.children = children;
        promoted
    }
}

/// Index of the key that moves up so each side keeps at least one key.
fn promote_index(sizes: &[usize]) -> usize {
    debug_assert!(sizes.len() >= 3);
    (weighted_median(sizes) - 1).clamp(1, sizes.len() - 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::zeroed_page;

    fn node(keys: &[u8], first_child: u64) -> BTreeInternalPage {
        BTreeInternalPage {
            keys: keys.iter().map(|k| vec![*k]).collect(),
            children: (0..=keys.len() as u64)
                .map(|i| PageId(first_child + i))
                .collect(),
        }
    }

    #[test]
    fn test_encode_decode() -> Result<()> {
        let internal = node(&[10, 20, 30], 5);
        let mut page = zeroed_page();
        internal.write_to(&mut page);

        let decoded = BTreeInternalPage::from_page(PageId(2), &page)?;
        assert_eq!(decoded, internal);
        Ok(())
    }

    #[test]
    fn test_child_index() {
        let internal = node(&[10, 20, 30], 5);
        assert_eq!(internal.child_index(&[0]), 0);
        assert_eq!(internal.child_index(&[10]), 1);
        assert_eq!(internal.child_index(&[15]), 1);
        assert_eq!(internal.child_index(&[20]), 2);
        assert_eq!(internal.child_index(&[99]), 3);
    }

    #[test]
    fn test_insert_split_and_remove() {
        let mut internal = node(&[10, 30], 1);
        internal.insert_split(1, vec![20], PageId(50));
        assert_eq!(internal.keys, vec![vec![10], vec![20], vec![30]]);
        assert_eq!(
            internal.children,
            vec![PageId(1), PageId(2), PageId(50), PageId(3)]
        );

        let (key, child) = internal.remove_right_of(1);
        assert_eq!(key, vec![20]);
        assert_eq!(child, PageId(50));
        assert_eq!(internal.children.len(), internal.keys.len() + 1);
    }

    #[test]
    fn test_split_promotes_median() {
        let keys: Vec<u8> = (1..=9).collect();
        let mut left = node(&keys, 100);
        let (promoted, right) = left.split();

        assert_eq!(promoted, vec![5]);
        assert_eq!(left.keys.len(), 4);
        assert_eq!(right.keys.len(), 4);
        assert_eq!(left.children.len(), 5);
        assert_eq!(right.children.len(), 5);
        assert_eq!(right.children[0], PageId(105));
    }

    #[test]
    fn test_merge_and_redistribute() {
        let mut left = node(&[1], 10);
        let right = node(&[5, 6], 20);
        assert!(left.can_merge_with(&[3], &right));
        left.merge_with(vec![3], right);
        assert_eq!(left.keys, vec![vec![1], vec![3], vec![5], vec![6]]);
        assert_eq!(left.children.len(), 5);

        let mut left = node(&[], 10);
        let mut right = node(&[5, 6, 7, 8, 9], 20);
        let separator = left.redistribute_with(vec![3], &mut right);
        assert_eq!(left.children.len(), left.keys.len() + 1);
        assert_eq!(right.children.len(), right.keys.len() + 1);
        assert!(!left.keys.is_empty());
        assert!(left.keys.last().unwrap() < &separator);
        assert!(right.keys[0] > separator);
    }
}
