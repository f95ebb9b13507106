//! B+Tree over variable-length byte keys.
//!
//! Leaves hold the key/value entries and are chained left to right. Internal
//! nodes hold separator keys: every key reachable through `children[i + 1]`
//! is at least `keys[i]`, and every key through `children[i]` is below it.
//!
//! The tree is generic over its page source. Lookups and scans need only
//! [`PageRead`]; modifications need [`PageWrite`] and only ever touch pages
//! through it, so a write transaction sees every change it made and nothing
//! leaks out before commit.

pub mod iterator;
pub mod pager;

use std::collections::HashSet;
use std::ops::Bound;

use log::trace;
use serde::Serialize;

use self::iterator::Scan;
pub use self::pager::{PageRead, PageView, PageWrite};
use crate::error::{Error, Result};
use crate::storage::page::btree_internal_page::BTreeInternalPage;
use crate::storage::page::btree_leaf_page::{
    BTreeLeafPage, LeafEntry, MAX_ENTRY_SIZE, MAX_KEY_SIZE,
};
use crate::storage::page::{PageId, PageType};

/// A decoded tree node.
pub(crate) enum Node {
    Leaf(BTreeLeafPage),
    Internal(BTreeInternalPage),
}

/// A node split handed up to the parent: the separator and the new right
/// sibling.
type Split = Option<(Vec<u8>, PageId)>;

/// Internal nodes passed on the way down to a leaf, root first, each with
/// the index of the child that was followed.
type Path = Vec<(PageId, BTreeInternalPage, usize)>;

/// Deeper than any tree a store can hold. Walks that get this far are
/// following a cycle.
const MAX_HEIGHT: usize = 64;

/// A subtree waiting to be checked by [`BTree::verify`], with the key range
/// its parent allows.
struct PendingNode {
    page_id: PageId,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
    depth: u32,
}

/// Shape of the tree as found by [`BTree::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub root_page_id: u64,
    /// Number of levels; a lone root leaf is height 1.
    pub height: u32,
    pub leaf_pages: usize,
    pub internal_pages: usize,
    pub entries: usize,
    /// Non-root nodes below the fill target.
    pub underfilled: usize,
}

pub struct BTree<P> {
    pages: P,
}

impl<P> BTree<P> {
    pub fn new(pages: P) -> Self {
        Self { pages }
    }

    pub fn into_inner(self) -> P {
        self.pages
    }
}

impl<P: PageRead> BTree<P> {
    pub(crate) fn load_node(&self, page_id: PageId) -> Result<Node> {
        let page = self.pages.read_page(page_id)?;
        match PageType::of(&page)? {
            PageType::Leaf => Ok(Node::Leaf(BTreeLeafPage::from_page(page_id, &page)?)),
            PageType::Internal => Ok(Node::Internal(BTreeInternalPage::from_page(
                page_id, &page,
            )?)),
            other => Err(Error::corruption(format!(
                "{} reached from the tree is a {:?} page",
                page_id, other
            ))),
        }
    }

    /// Descend to the leaf whose key range covers `key`. `None` picks the
    /// leftmost leaf.
    pub(crate) fn find_leaf(&self, key: Option<&[u8]>) -> Result<(PageId, BTreeLeafPage)> {
        let mut page_id = self.pages.root_page_id()?;
        for _ in 0..MAX_HEIGHT {
            match self.load_node(page_id)? {
                Node::Leaf(leaf) => return Ok((page_id, leaf)),
                Node::Internal(node) => {
                    let index = key.map(|k| node.child_index(k)).unwrap_or(0);
                    page_id = node.child(index);
                }
            }
        }
        Err(too_deep(page_id))
    }

    /// Descend from `root` to the leaf covering `key`, remembering the way.
    fn descend(&self, root: PageId, key: &[u8]) -> Result<(Path, PageId, BTreeLeafPage)> {
        let mut path = Vec::new();
        let mut page_id = root;
        while path.len() < MAX_HEIGHT {
            match self.load_node(page_id)? {
                Node::Leaf(leaf) => return Ok((path, page_id, leaf)),
                Node::Internal(node) => {
                    let index = node.child_index(key);
                    let child = node.child(index);
                    path.push((page_id, node, index));
                    page_id = child;
                }
            }
        }
        Err(too_deep(page_id))
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (_, leaf) = self.find_leaf(Some(key))?;
        Ok(leaf.get(key).map(<[u8]>::to_vec))
    }

    /// Lazily iterate the entries between two bounds in key order.
    pub fn scan_range(&self, low: Bound<&[u8]>, high: Bound<&[u8]>) -> Result<Scan<'_, P>> {
        Scan::new(self, low, high)
    }

    /// Collect every entry with `low <= key <= high`.
    pub fn scan(&self, low: &[u8], high: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.scan_range(Bound::Included(low), Bound::Included(high))?
            .collect()
    }

    pub fn height(&self) -> Result<u32> {
        let mut page_id = self.pages.root_page_id()?;
        let mut height = 1;
        while let Node::Internal(node) = self.load_node(page_id)? {
            if height as usize >= MAX_HEIGHT {
                return Err(too_deep(page_id));
            }
            page_id = node.child(0);
            height += 1;
        }
        Ok(height)
    }

    /// Walk the whole tree checking key order, separator bounds, uniform
    /// leaf depth and the leaf chain.
    pub fn verify(&self) -> Result<TreeStats> {
        let root = self.pages.root_page_id()?;
        let mut stats = TreeStats {
            root_page_id: root.0,
            ..TreeStats::default()
        };
        // Leaves in key order, each with its `next` link.
        let mut leaves: Vec<(PageId, Option<PageId>)> = Vec::new();
        let mut leaf_depth = None;
        let mut seen = HashSet::new();
        let mut stack = vec![PendingNode {
            page_id: root,
            lower: None,
            upper: None,
            depth: 1,
        }];

        while let Some(pending) = stack.pop() {
            let page_id = pending.page_id;
            if !seen.insert(page_id) {
                return Err(Error::corruption(format!(
                    "{} is reachable twice from the root",
                    page_id
                )));
            }
            if pending.depth as usize > MAX_HEIGHT {
                return Err(too_deep(page_id));
            }
            let is_root = page_id == root;
            let lower = pending.lower.as_deref();
            let upper = pending.upper.as_deref();
            let in_bounds = |key: &[u8]| {
                lower.map_or(true, |l| key >= l) && upper.map_or(true, |u| key < u)
            };

            match self.load_node(page_id)? {
                Node::Leaf(leaf) => {
                    stats.leaf_pages += 1;
                    stats.entries += leaf.len();
                    if !is_root && leaf.underflows() {
                        stats.underfilled += 1;
                    }
                    if leaf.overflows() {
                        return Err(Error::corruption(format!("leaf {} overflows", page_id)));
                    }
                    if leaf.entries.windows(2).any(|pair| pair[0].key >= pair[1].key) {
                        return Err(Error::corruption(format!(
                            "leaf {} keys are out of order",
                            page_id
                        )));
                    }
                    if let Some(bad) = leaf.entries.iter().find(|e| !in_bounds(&e.key)) {
                        return Err(Error::corruption(format!(
                            "leaf {} holds key {:?} outside its parent's range",
                            page_id, bad.key
                        )));
                    }
                    match leaf_depth {
                        None => leaf_depth = Some(pending.depth),
                        Some(d) if d != pending.depth => {
                            return Err(Error::corruption(format!(
                                "leaf {} at depth {}, others at {}",
                                page_id, pending.depth, d
                            )));
                        }
                        Some(_) => {}
                    }
                    leaves.push((page_id, leaf.next));
                }
                Node::Internal(node) => {
                    stats.internal_pages += 1;
                    if node.keys.is_empty() {
                        return Err(Error::corruption(format!(
                            "internal {} has no separators",
                            page_id
                        )));
                    }
                    if !is_root && node.underflows() {
                        stats.underfilled += 1;
                    }
                    if node.keys.windows(2).any(|pair| pair[0] >= pair[1]) {
                        return Err(Error::corruption(format!(
                            "internal {} separators are out of order",
                            page_id
                        )));
                    }
                    if let Some(bad) = node.keys.iter().find(|k| !in_bounds(k)) {
                        return Err(Error::corruption(format!(
                            "internal {} separator {:?} outside its parent's range",
                            page_id, bad
                        )));
                    }
                    // Pushed right to left so leaves are reached in key order.
                    for (i, child) in node.children.iter().enumerate().rev() {
                        let child_lower = if i == 0 {
                            pending.lower.clone()
                        } else {
                            Some(node.keys[i - 1].clone())
                        };
                        let child_upper = node.keys.get(i).cloned().or_else(|| pending.upper.clone());
                        stack.push(PendingNode {
                            page_id: *child,
                            lower: child_lower,
                            upper: child_upper,
                            depth: pending.depth + 1,
                        });
                    }
                }
            }
        }
        stats.height = leaf_depth.unwrap_or(1);

        for (i, (page_id, next)) in leaves.iter().enumerate() {
            let expected = leaves.get(i + 1).map(|(id, _)| *id);
            if *next != expected {
                return Err(Error::corruption(format!(
                    "leaf {} links to {:?}, expected {:?}",
                    page_id, next, expected
                )));
            }
        }
        Ok(stats)
    }
}

fn too_deep(page_id: PageId) -> Error {
    Error::corruption(format!(
        "tree deeper than {} levels at {}, pages form a cycle",
        MAX_HEIGHT, page_id
    ))
}

impl<P: PageWrite> BTree<P> {
    fn check_entry(key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() > MAX_KEY_SIZE {
            return Err(Error::KeyTooLarge {
                size: key.len(),
                max: MAX_KEY_SIZE,
            });
        }
        let size = LeafEntry::size_of(key.len(), value.len());
        if size > MAX_ENTRY_SIZE {
            return Err(Error::EntryTooLarge {
                size,
                max: MAX_ENTRY_SIZE,
            });
        }
        Ok(())
    }

    /// Insert or overwrite `key`. Returns the value it replaced.
    ///
    /// Splits travel back up the path taken on the way down, one level at
    /// a time, until a parent absorbs them or the root splits.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        Self::check_entry(key, value)?;
        let root = self.pages.root_page_id()?;
        let (mut path, leaf_id, mut leaf) = self.descend(root, key)?;
        let old = leaf.upsert(key, value);

        let mut split = self.write_leaf(leaf_id, leaf)?;
        while let Some((separator, right)) = split.take() {
            match path.pop() {
                Some((page_id, mut node, index)) => {
                    node.insert_split(index, separator, right);
                    split = self.write_internal(page_id, node)?;
                }
                None => self.grow_root(root, separator, right)?,
            }
        }
        Ok(old)
    }

    /// Store a leaf, splitting it first if it no longer fits.
    fn write_leaf(&mut self, page_id: PageId, mut leaf: BTreeLeafPage) -> Result<Split> {
        if !leaf.overflows() {
            leaf.write_to(self.pages.write_page(page_id)?);
            return Ok(None);
        }

        let (separator, right) = leaf.split();
        let right_id = self.pages.allocate_page()?;
        leaf.next = Some(right_id);
        right.write_to(self.pages.write_page(right_id)?);
        leaf.write_to(self.pages.write_page(page_id)?);
        trace!("Split leaf {} into {}", page_id, right_id);
        Ok(Some((separator, right_id)))
    }

    /// Store an internal node, splitting it first if it no longer fits.
    fn write_internal(&mut self, page_id: PageId, mut node: BTreeInternalPage) -> Result<Split> {
        if !node.overflows() {
            node.write_to(self.pages.write_page(page_id)?);
            return Ok(None);
        }

        let (promoted, right) = node.split();
        let right_id = self.pages.allocate_page()?;
        right.write_to(self.pages.write_page(right_id)?);
        node.write_to(self.pages.write_page(page_id)?);
        trace!("Split internal {} into {}", page_id, right_id);
        Ok(Some((promoted, right_id)))
    }

    fn grow_root(&mut self, root: PageId, separator: Vec<u8>, right: PageId) -> Result<()> {
        let new_root = self.pages.allocate_page()?;
        BTreeInternalPage::new_root(root, separator, right).write_to(self.pages.write_page(new_root)?);
        self.pages.set_root_page_id(new_root)?;
        trace!("Tree grew a new root {}", new_root);
        Ok(())
    }

    /// Remove `key`. Returns whether it was present.
    ///
    /// An underfull node is rebalanced by its parent, which may leave the
    /// parent underfull in turn. A redistribution can also lengthen a
    /// separator enough to split the parent.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        if key.len() > MAX_KEY_SIZE {
            return Ok(false);
        }
        let root = self.pages.root_page_id()?;
        let (mut path, leaf_id, mut leaf) = self.descend(root, key)?;
        if leaf.remove(key).is_none() {
            return Ok(false);
        }
        let mut underflow = leaf.underflows();
        leaf.write_to(self.pages.write_page(leaf_id)?);

        let mut split: Split = None;
        while underflow || split.is_some() {
            let Some((page_id, mut node, index)) = path.pop() else {
                break;
            };
            match split.take() {
                Some((separator, right)) => node.insert_split(index, separator, right),
                None => self.handle_child_merge(&mut node, index)?,
            }
            let node_underflows = node.underflows();
            split = self.write_internal(page_id, node)?;
            underflow = split.is_none() && node_underflows;
        }

        if let Some((separator, right)) = split {
            self.grow_root(root, separator, right)?;
        } else if underflow && path.is_empty() {
            self.collapse_root(root)?;
        }
        Ok(true)
    }

    /// Merge the underfull `children[index]` with a sibling under the same
    /// parent, or move entries over when the two do not fit in one page.
    fn handle_child_merge(&mut self, parent: &mut BTreeInternalPage, index: usize) -> Result<()> {
        if parent.children.len() < 2 {
            return Ok(());
        }
        let left_index = if index + 1 < parent.children.len() {
            index
        } else {
            index - 1
        };
        let left_id = parent.child(left_index);
        let right_id = parent.child(left_index + 1);

        match (self.load_node(left_id)?, self.load_node(right_id)?) {
            (Node::Leaf(mut left), Node::Leaf(mut right)) => {
                if left.can_merge_with(&right) {
                    left.merge_with(right);
                    left.write_to(self.pages.write_page(left_id)?);
                    self.pages.free_page(right_id)?;
                    parent.remove_right_of(left_index);
                    trace!("Merged leaf {} into {}", right_id, left_id);
                } else {
                    let separator = left.redistribute_with(&mut right);
                    left.write_to(self.pages.write_page(left_id)?);
                    right.write_to(self.pages.write_page(right_id)?);
                    parent.keys[left_index] = separator;
                }
            }
            (Node::Internal(mut left), Node::Internal(mut right)) => {
                let separator = parent.keys[left_index].clone();
                if left.can_merge_with(&separator, &right) {
                    left.merge_with(separator, right);
                    left.write_to(self.pages.write_page(left_id)?);
                    self.pages.free_page(right_id)?;
                    parent.remove_right_of(left_index);
                    trace!("Merged internal {} into {}", right_id, left_id);
                } else {
                    let promoted = left.redistribute_with(separator, &mut right);
                    left.write_to(self.pages.write_page(left_id)?);
                    right.write_to(self.pages.write_page(right_id)?);
                    parent.keys[left_index] = promoted;
                }
            }
            _ => {
                return Err(Error::corruption(format!(
                    "siblings {} and {} are at different levels",
                    left_id, right_id
                )));
            }
        }
        Ok(())
    }

    /// Replace an internal root left with a single child by that child.
    fn collapse_root(&mut self, root: PageId) -> Result<()> {
        if let Node::Internal(node) = self.load_node(root)? {
            if node.keys.is_empty() {
                let child = node.child(0);
                self.pages.set_root_page_id(child)?;
                self.pages.free_page(root)?;
                trace!("Collapsed root {} into {}", root, child);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::pager::memory::MemoryPages;
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    fn key(i: u32) -> Vec<u8> {
        format!("key{:06}", i).into_bytes()
    }

    fn value(i: u32) -> Vec<u8> {
        format!("value-{}", i).into_bytes()
    }

    /// A 300-byte key, so only a dozen fit in an internal node and a few
    /// thousand keys build a tree of height three or more.
    fn wide_key(i: u32) -> Vec<u8> {
        let mut key = key(i);
        key.resize(300, b'.');
        key
    }

    fn tree_with(keys: impl IntoIterator<Item = u32>) -> Result<BTree<MemoryPages>> {
        let mut tree = BTree::new(MemoryPages::new());
        for i in keys {
            tree.insert(&key(i), &value(i))?;
        }
        Ok(tree)
    }

    fn wide_tree_with(keys: impl IntoIterator<Item = u32>) -> Result<BTree<MemoryPages>> {
        let mut tree = BTree::new(MemoryPages::new());
        for i in keys {
            tree.insert(&wide_key(i), &value(i))?;
        }
        Ok(tree)
    }

    #[test]
    fn test_btree_empty() -> Result<()> {
        let tree = BTree::new(MemoryPages::new());
        assert_eq!(tree.get(b"missing")?, None);
        assert_eq!(tree.height()?, 1);
        assert!(tree.scan(b"", b"\xff")?.is_empty());
        let stats = tree.verify()?;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.leaf_pages, 1);
        Ok(())
    }

    #[test]
    fn test_btree_insert_and_get() -> Result<()> {
        let mut tree = BTree::new(MemoryPages::new());
        assert_eq!(tree.insert(b"b", b"2")?, None);
        assert_eq!(tree.insert(b"a", b"1")?, None);
        assert_eq!(tree.get(b"a")?, Some(b"1".to_vec()));
        assert_eq!(tree.get(b"b")?, Some(b"2".to_vec()));
        assert_eq!(tree.get(b"c")?, None);
        Ok(())
    }

    #[test]
    fn test_btree_insert_overwrites() -> Result<()> {
        let mut tree = BTree::new(MemoryPages::new());
        tree.insert(b"k", b"old")?;
        assert_eq!(tree.insert(b"k", b"new")?, Some(b"old".to_vec()));
        assert_eq!(tree.get(b"k")?, Some(b"new".to_vec()));
        assert_eq!(tree.verify()?.entries, 1);
        Ok(())
    }

    #[test]
    fn test_btree_insert_causes_split() -> Result<()> {
        let tree = tree_with(0..500)?;
        assert!(tree.height()? >= 2);

        let stats = tree.verify()?;
        assert_eq!(stats.entries, 500);
        assert!(stats.leaf_pages > 1);
        for i in 0..500 {
            assert_eq!(tree.get(&key(i))?, Some(value(i)));
        }
        Ok(())
    }

    #[test]
    fn test_btree_insert_reverse_ordered_keys() -> Result<()> {
        let tree = wide_tree_with((0..2000).rev())?;
        let stats = tree.verify()?;
        assert_eq!(stats.entries, 2000);
        assert!(stats.height >= 3);
        assert!(stats.internal_pages > 1);
        for i in (0..2000).step_by(97) {
            assert_eq!(tree.get(&wide_key(i))?, Some(value(i)));
        }
        Ok(())
    }

    #[test]
    fn test_btree_size_limits() {
        let mut tree = BTree::new(MemoryPages::new());
        let long_key = vec![b'k'; MAX_KEY_SIZE + 1];
        assert!(matches!(
            tree.insert(&long_key, b"v"),
            Err(Error::KeyTooLarge { .. })
        ));

        let big_value = vec![0u8; MAX_ENTRY_SIZE];
        assert!(matches!(
            tree.insert(b"k", &big_value),
            Err(Error::EntryTooLarge { .. })
        ));

        // The largest allowed entry fits.
        let max_value = vec![0u8; MAX_ENTRY_SIZE - LeafEntry::size_of(1, 0)];
        assert!(tree.insert(b"k", &max_value).is_ok());
    }

    #[test]
    fn test_btree_large_entries_split_cleanly() -> Result<()> {
        let mut tree = BTree::new(MemoryPages::new());
        let big = vec![7u8; MAX_ENTRY_SIZE - LeafEntry::size_of(9, 0)];
        for i in 0..100 {
            tree.insert(&key(i), &big)?;
        }
        let stats = tree.verify()?;
        assert_eq!(stats.entries, 100);
        assert!(stats.leaf_pages >= 25);
        Ok(())
    }

    #[test]
    fn test_btree_delete() -> Result<()> {
        let mut tree = tree_with(0..10)?;
        assert!(tree.delete(&key(3))?);
        assert!(!tree.delete(&key(3))?);
        assert!(!tree.delete(b"absent")?);
        assert_eq!(tree.get(&key(3))?, None);
        assert_eq!(tree.verify()?.entries, 9);
        Ok(())
    }

    #[test]
    fn test_btree_delete_all_collapses_tree() -> Result<()> {
        let mut tree = wide_tree_with(0..3000)?;
        assert!(tree.height()? >= 3);

        // Random order, so internal nodes both merge and borrow from
        // siblings on either side.
        let mut order: Vec<u32> = (0..3000).collect();
        order.shuffle(&mut StdRng::seed_from_u64(7));
        for (n, i) in order.into_iter().enumerate() {
            assert!(tree.delete(&wide_key(i))?, "key {} should be present", i);
            if n % 500 == 0 {
                tree.verify()?;
            }
        }
        let stats = tree.verify()?;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.height, 1);
        assert_eq!(stats.leaf_pages, 1);

        // Merged pages went back to the free list.
        let pages = tree.into_inner();
        assert_eq!(pages.live_pages(), 1);
        Ok(())
    }

    #[test]
    fn test_btree_freed_pages_are_reused() -> Result<()> {
        let mut tree = tree_with(0..1000)?;
        for i in 0..1000 {
            tree.delete(&key(i))?;
        }
        let mut pages = tree.into_inner();
        let freed = pages.freed;
        assert!(freed > 0);
        pages.allocate_page()?;
        assert_eq!(pages.freed, freed - 1);
        Ok(())
    }

    #[test]
    fn test_btree_scan_bounds() -> Result<()> {
        let tree = tree_with(0..100)?;

        let all = tree.scan(&key(0), &key(99))?;
        assert_eq!(all.len(), 100);
        assert!(all.windows(2).all(|w| w[0].0 < w[1].0));

        let middle = tree.scan(&key(10), &key(19))?;
        assert_eq!(middle.len(), 10);
        assert_eq!(middle[0], (key(10), value(10)));
        assert_eq!(middle[9].0, key(19));

        let excluded: Vec<_> = tree
            .scan_range(Bound::Excluded(key(10).as_slice()), Bound::Excluded(key(15).as_slice()))?
            .collect::<Result<_>>()?;
        assert_eq!(excluded.len(), 4);
        assert_eq!(excluded[0].0, key(11));

        assert!(tree.scan(&key(50), &key(40))?.is_empty());
        assert!(tree.scan(b"zzz", b"zzzz")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_btree_random_operations_match_model() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut tree = BTree::new(MemoryPages::new());
        let mut model = BTreeMap::new();

        for round in 0..5000 {
            let k = key(rng.gen_range(0..800));
            if rng.gen_bool(0.6) {
                let len = rng.gen_range(0..200);
                let v: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                assert_eq!(tree.insert(&k, &v)?, model.insert(k, v));
            } else {
                assert_eq!(tree.delete(&k)?, model.remove(&k).is_some());
            }
            if round % 500 == 0 {
                tree.verify()?;
            }
        }

        let stats = tree.verify()?;
        assert_eq!(stats.entries, model.len());
        let scanned = tree.scan(b"", &[0xff; 16])?;
        let expected: Vec<_> = model.into_iter().collect();
        assert_eq!(scanned, expected);
        Ok(())
    }

    #[test]
    fn test_btree_shuffled_insert_then_delete_sevens() -> Result<()> {
        let mut order: Vec<u32> = (1..1000).collect();
        order.shuffle(&mut StdRng::seed_from_u64(42));
        let mut tree = tree_with(order)?;

        for i in (7..1000).step_by(7) {
            assert!(tree.delete(&key(i))?);
        }

        let remaining = tree.scan(&key(1), &key(1000))?;
        assert_eq!(remaining.len(), 857);
        assert!(remaining.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(tree.get(&key(14))?.is_none());
        assert_eq!(tree.verify()?.entries, 857);
        Ok(())
    }

    #[test]
    fn test_btree_page_cycle_is_corruption() -> Result<()> {
        let mut pages = MemoryPages::new();
        let looped = pages.allocate_page()?;
        BTreeInternalPage::new_root(looped, b"m".to_vec(), looped)
            .write_to(pages.write_page(looped)?);
        pages.set_root_page_id(looped)?;

        let mut tree = BTree::new(pages);
        assert!(tree.get(b"a").unwrap_err().is_corruption());
        assert!(tree.verify().unwrap_err().is_corruption());
        assert!(tree.insert(b"z", b"1").unwrap_err().is_corruption());
        Ok(())
    }
}
