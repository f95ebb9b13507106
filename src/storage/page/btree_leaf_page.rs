//! B+Tree leaf node format.
//!
//! Layout after the common page header:
//!
//! | offset | size | field                   |
//! |--------|------|-------------------------|
//! | 10     | 2    | entry count             |
//! | 12     | 8    | next leaf (0 = none)    |
//! | 20     | ...  | entries                 |
//!
//! Each entry is `key_len u16 | value_len u16 | key | value`, stored in key order.

use crate::error::{Error, Result};
use crate::storage::page::{
    read_u16, read_u64, write_u16, write_u64, PageBuf, PageId, PageType, PAGE_SIZE,
};

pub const NODE_HEADER_SIZE: usize = 20;
/// Bytes available for entries in a node.
pub const NODE_CAPACITY: usize = PAGE_SIZE - NODE_HEADER_SIZE;
/// A non-root node holding fewer entry bytes than this is underfull.
pub const MIN_FILL: usize = NODE_CAPACITY / 4;
pub const MAX_KEY_SIZE: usize = 512;
/// Largest encoded leaf entry. Keeping entries at a quarter of a node
/// guarantees both halves of a split fit in a page.
pub const MAX_ENTRY_SIZE: usize = NODE_CAPACITY / 4;

const COUNT_OFFSET: usize = 10;
const NEXT_OFFSET: usize = 12;
const ENTRY_HEADER_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl LeafEntry {
    pub fn encoded_size(&self) -> usize {
        Self::size_of(self.key.len(), self.value.len())
    }

    pub fn size_of(key_len: usize, value_len: usize) -> usize {
        ENTRY_HEADER_SIZE + key_len + value_len
    }
}

/// Decoded leaf node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BTreeLeafPage {
    pub entries: Vec<LeafEntry>,
    pub next: Option<PageId>,
}

impl BTreeLeafPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_page(page_id: PageId, data: &PageBuf) -> Result<Self> {
        if PageType::of(data)? != PageType::Leaf {
            return Err(Error::corruption(format!("{} is not a leaf page", page_id)));
        }
        let count = read_u16(data, COUNT_OFFSET) as usize;
        let next = PageId::from_raw(read_u64(data, NEXT_OFFSET));

        let mut entries = Vec::with_capacity(count);
        let mut pos = NODE_HEADER_SIZE;
        for _ in 0..count {
            if pos + ENTRY_HEADER_SIZE > PAGE_SIZE {
                return Err(Self::overrun(page_id));
            }
            let key_len = read_u16(data, pos) as usize;
            let value_len = read_u16(data, pos + 2) as usize;
            pos += ENTRY_HEADER_SIZE;
            if pos + key_len + value_len > PAGE_SIZE {
                return Err(Self::overrun(page_id));
            }
            let key = data[pos..pos + key_len].to_vec();
            pos += key_len;
            let value = data[pos..pos + value_len].to_vec();
            pos += value_len;
            entries.push(LeafEntry { key, value });
        }

        Ok(Self { entries, next })
    }

    fn overrun(page_id: PageId) -> Error {
        Error::corruption(format!("leaf {} entries overrun the page", page_id))
    }

    /// Serialize into `data`. The caller guarantees the node fits.
    pub fn write_to(&self, data: &mut PageBuf) {
        debug_assert!(!self.overflows());
        data.fill(0);
        PageType::Leaf.stamp(data);
        write_u16(data, COUNT_OFFSET, self.entries.len() as u16);
        write_u64(data, NEXT_OFFSET, PageId::to_raw(self.next));

        let mut pos = NODE_HEADER_SIZE;
        for entry in &self.entries {
            write_u16(data, pos, entry.key.len() as u16);
            write_u16(data, pos + 2, entry.value.len() as u16);
            pos += ENTRY_HEADER_SIZE;
            data[pos..pos + entry.key.len()].copy_from_slice(&entry.key);
            pos += entry.key.len();
            data[pos..pos + entry.value.len()].copy_from_slice(&entry.value);
            pos += entry.value.len();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn payload_size(&self) -> usize {
        self.entries.iter().map(LeafEntry::encoded_size).sum()
    }

    pub fn overflows(&self) -> bool {
        self.payload_size() > NODE_CAPACITY
    }

    pub fn underflows(&self) -> bool {
        self.entries.is_empty() || self.payload_size() < MIN_FILL
    }

    /// Binary search by key; `Err` holds the insert position.
    pub fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|e| e.key.as_slice().cmp(key))
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.search(key)
            .ok()
            .map(|idx| self.entries[idx].value.as_slice())
    }

    /// Insert or overwrite. Returns the previous value.
    pub fn upsert(&mut self, key: &[u8], value: &[u8]) -> Option<Vec<u8>> {
        match self.search(key) {
            Ok(idx) => Some(std::mem::replace(
                &mut self.entries[idx].value,
                value.to_vec(),
            )),
            Err(idx) => {
                self.entries.insert(
                    idx,
                    LeafEntry {
                        key: key.to_vec(),
                        value: value.to_vec(),
                    },
                );
                None
            }
        }
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.search(key)
            .ok()
            .map(|idx| self.entries.remove(idx).value)
    }

    /// Split at the byte-weighted median. `self` keeps the lower half; the
    /// returned node holds the upper half and inherits the next pointer,
    /// which the caller relinks once the new page has an id.
    pub fn split(&mut self) -> (Vec<u8>, BTreeLeafPage) {
        let sizes: Vec<usize> = self.entries.iter().map(LeafEntry::encoded_size).collect();
        let mid = weighted_median(&sizes);
        let right_entries = self.entries.split_off(mid);
        let separator = right_entries[0].key.clone();
        let right = BTreeLeafPage {
            entries: right_entries,
            next: self.next,
        };
        (separator, right)
    }

    pub fn can_merge_with(&self, right: &BTreeLeafPage) -> bool {
        self.payload_size() + right.payload_size() <= NODE_CAPACITY
    }

    /// Absorb the right sibling.
    pub fn merge_with(&mut self, right: BTreeLeafPage) {
        self.entries.extend(right.entries);
        self.next = right.next;
    }

    /// Even out two siblings that cannot be merged. Returns the new separator.
    pub fn redistribute_with(&mut self, right: &mut BTreeLeafPage) -> Vec<u8> {
        let mut combined = std::mem::take(&mut self.entries);
        combined.append(&mut right.entries);
        let sizes: Vec<usize> = combined.iter().map(LeafEntry::encoded_size).collect();
        let mid = weighted_median(&sizes);
        right.entries = combined.split_off(mid);
        self.entries = combined;
        right.entries[0].key.clone()
    }

    pub fn first_key(&self) -> Option<&[u8]> {
        self.entries.first().map(|e| e.key.as_slice())
    }

    pub fn last_key(&self) -> Option<&[u8]> {
        self.entries.last().map(|e| e.key.as_slice())
    }
}

/// Smallest index `m` in `1..len` such that the first `m` sizes make up at
/// least half of the total. Requires at least two items.
pub(crate) fn weighted_median(sizes: &[usize]) -> usize {
    debug_assert!(sizes.len() >= 2);
    let total: usize = sizes.iter().sum();
    let mut acc = 0;
    for (i, size) in sizes.iter().enumerate() {
        acc += size;
        if acc * 2 >= total {
            return (i + 1).clamp(1, sizes.len() - 1);
        }
    }
    sizes.len() - 1
}
