//! Range scans over the leaf chain.

use std::collections::VecDeque;
use std::ops::Bound;

use super::{BTree, Node, PageRead};
use crate::error::{Error, Result};
use crate::storage::page::btree_leaf_page::BTreeLeafPage;
use crate::storage::page::PageId;

/// Iterator for B+Tree range scans.
///
/// Holds one decoded leaf at a time and follows next-leaf links, so memory
/// stays bounded by a single page regardless of the range size.
pub struct Scan<'a, P> {
    tree: &'a BTree<P>,
    high: Bound<Vec<u8>>,
    /// Entries of the current leaf not yet returned.
    pending: VecDeque<(Vec<u8>, Vec<u8>)>,
    next_leaf: Option<PageId>,
    /// Where a scan continued elsewhere would pick up.
    resume: Bound<Vec<u8>>,
    done: bool,
}

impl<'a, P: PageRead> Scan<'a, P> {
    pub(crate) fn new(tree: &'a BTree<P>, low: Bound<&[u8]>, high: Bound<&[u8]>) -> Result<Self> {
        let start = match low {
            Bound::Included(k) | Bound::Excluded(k) => Some(k),
            Bound::Unbounded => None,
        };
        let (_, leaf) = tree.find_leaf(start)?;

        let mut scan = Scan {
            tree,
            high: high.map(<[u8]>::to_vec),
            pending: VecDeque::new(),
            next_leaf: None,
            resume: low.map(<[u8]>::to_vec),
            done: Self::empty_range(low, high),
        };
        if !scan.done {
            scan.load(leaf, low);
        }
        Ok(scan)
    }

    fn empty_range(low: Bound<&[u8]>, high: Bound<&[u8]>) -> bool {
        match (low, high) {
            (Bound::Included(l), Bound::Included(h)) => l > h,
            (Bound::Included(l), Bound::Excluded(h))
            | (Bound::Excluded(l), Bound::Included(h))
            | (Bound::Excluded(l), Bound::Excluded(h)) => l >= h,
            _ => false,
        }
    }

    fn load(&mut self, leaf: BTreeLeafPage, low: Bound<&[u8]>) {
        self.next_leaf = leaf.next;
        self.pending = leaf
            .entries
            .into_iter()
            .filter(|e| match low {
                Bound::Included(l) => e.key.as_slice() >= l,
                Bound::Excluded(l) => e.key.as_slice() > l,
                Bound::Unbounded => true,
            })
            .map(|e| (e.key, e.value))
            .collect();
    }

    fn below_high(&self, key: &[u8]) -> bool {
        match &self.high {
            Bound::Included(h) => key <= h.as_slice(),
            Bound::Excluded(h) => key < h.as_slice(),
            Bound::Unbounded => true,
        }
    }

    /// Lower bound that continues this scan after the last returned entry.
    pub fn resume_bound(&self) -> Bound<&[u8]> {
        self.resume.as_ref().map(Vec::as_slice)
    }

    fn advance(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            if let Some((key, value)) = self.pending.pop_front() {
                if !self.below_high(&key) {
                    return Ok(None);
                }
                self.resume = Bound::Excluded(key.clone());
                return Ok(Some((key, value)));
            }
            let Some(next) = self.next_leaf else {
                return Ok(None);
            };
            match self.tree.load_node(next)? {
                Node::Leaf(leaf) => self.load(leaf, Bound::Unbounded),
                Node::Internal(_) => {
                    return Err(Error::corruption(format!(
                        "leaf chain points at internal {}",
                        next
                    )));
                }
            }
        }
    }
}

impl<P: PageRead> Iterator for Scan<'_, P> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::pager::memory::MemoryPages;
    use super::*;

    fn tree(n: u32) -> BTree<MemoryPages> {
        let mut tree = BTree::new(MemoryPages::new());
        for i in 0..n {
            tree.insert(format!("{:05}", i).as_bytes(), &i.to_le_bytes())
                .unwrap();
        }
        tree
    }

    #[test]
    fn test_unbounded_scan_crosses_leaves() {
        let tree = tree(1500);
        assert!(tree.verify().unwrap().leaf_pages > 1);

        let keys: Vec<Vec<u8>> = tree
            .scan_range(Bound::Unbounded, Bound::Unbounded)
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys.len(), 1500);
        assert_eq!(keys[0], b"00000".to_vec());
        assert_eq!(keys[1499], b"01499".to_vec());
    }

    #[test]
    fn test_scan_is_lazy_and_resumable() {
        let tree = tree(1000);
        let mut scan = tree
            .scan_range(Bound::Included(&b"00100"[..]), Bound::Unbounded)
            .unwrap();

        let first: Vec<_> = scan.by_ref().take(3).map(|r| r.unwrap().0).collect();
        assert_eq!(first[2], b"00102".to_vec());
        assert_eq!(scan.resume_bound(), Bound::Excluded(&b"00102"[..]));

        let resumed = tree
            .scan_range(scan.resume_bound(), Bound::Included(&b"00104"[..]))
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect::<Vec<_>>();
        assert_eq!(resumed, vec![b"00103".to_vec(), b"00104".to_vec()]);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let tree = tree(10);
        let mut scan = tree
            .scan_range(Bound::Excluded(&b"00005"[..]), Bound::Excluded(&b"00005"[..]))
            .unwrap();
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_scan_low_between_keys() {
        let tree = tree(10);
        let keys: Vec<_> = tree
            .scan_range(Bound::Included(&b"00003x"[..]), Bound::Excluded(&b"00006"[..]))
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, vec![b"00004".to_vec(), b"00005".to_vec()]);
    }
}
