//! B-tree index engine.
//!
//! Keys map to opaque row bytes. All leaves sit at the same depth; an
//! overflowing node splits at its size median and an underfull node is folded
//! into a sibling (re-splitting when the fold overflows, which doubles as
//! borrowing). Every structural change goes through the caller's
//! [`PageStore`], so nothing becomes visible outside the owning transaction
//! until it commits.

use crate::access::PageStore;
use crate::error::{Error, Result};
use crate::storage::page::internal_page::InternalNode;
use crate::storage::page::leaf_page::{LeafNode, MAX_ENTRY_PAYLOAD};
use crate::storage::page::{PageData, PageId, PAGE_TYPE_INTERNAL, PAGE_TYPE_LEAF};
use std::ops::Bound;

enum NodeKind {
    Internal,
    Leaf,
}

fn node_kind(data: &PageData) -> Result<NodeKind> {
    match data[0] {
        PAGE_TYPE_INTERNAL => Ok(NodeKind::Internal),
        PAGE_TYPE_LEAF => Ok(NodeKind::Leaf),
        other => Err(Error::Corruption(format!(
            "expected a b-tree node, found page type tag {other}"
        ))),
    }
}

/// One table's index. Holds only the root page number; the page images live
/// in the transaction's view.
#[derive(Debug, Clone, Copy)]
pub struct BTree {
    root: PageId,
}

impl BTree {
    /// Allocate an empty tree: a single leaf root.
    pub fn create<S: PageStore>(store: &mut S) -> Result<Self> {
        let root = store.allocate()?;
        store.write(root, LeafNode::new().encode()?)?;
        Ok(Self { root })
    }

    pub fn open(root: PageId) -> Self {
        Self { root }
    }

    /// Root page, which moves when splits or merges change the tree height.
    /// Callers persist it in the table directory after each mutation.
    pub fn root(&self) -> PageId {
        self.root
    }

    pub fn lookup<S: PageStore>(&self, store: &mut S, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut page_id = self.root;
        loop {
            let data = store.read(page_id)?;
            match node_kind(&data)? {
                NodeKind::Internal => {
                    let node = InternalNode::decode(&data)?;
                    page_id = node.child(node.child_index(key));
                }
                NodeKind::Leaf => {
                    let node = LeafNode::decode(&data)?;
                    return Ok(node
                        .search(key)
                        .ok()
                        .map(|i| node.entries[i].1.clone()));
                }
            }
        }
    }

    /// Insert a new record. Fails with `DuplicateKey` (leaving the tree
    /// untouched) when the key already exists.
    pub fn insert<S: PageStore>(&mut self, store: &mut S, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() + value.len() > MAX_ENTRY_PAYLOAD {
            return Err(Error::Schema(format!(
                "record of {} bytes exceeds the {MAX_ENTRY_PAYLOAD} byte limit",
                key.len() + value.len()
            )));
        }

        if let Some((separator, right)) = Self::insert_into(store, self.root, key, value)? {
            let new_root = store.allocate()?;
            let root_node = InternalNode::new_root(self.root, separator, right);
            store.write(new_root, root_node.encode()?)?;
            self.root = new_root;
        }
        Ok(())
    }

    fn insert_into<S: PageStore>(
        store: &mut S,
        page_id: PageId,
        key: &[u8],
        value: &[u8],
    ) -> Result<Option<(Vec<u8>, PageId)>> {
        let data = store.read(page_id)?;
        match node_kind(&data)? {
            NodeKind::Leaf => {
                let mut node = LeafNode::decode(&data)?;
                match node.search(key) {
                    Ok(_) => return Err(Error::DuplicateKey),
                    Err(pos) => node.entries.insert(pos, (key.to_vec(), value.to_vec())),
                }

                if node.overflows() {
                    let (right, separator) = node.split();
                    let right_id = store.allocate()?;
                    node.next = Some(right_id);
                    store.write(right_id, right.encode()?)?;
                    store.write(page_id, node.encode()?)?;
                    Ok(Some((separator, right_id)))
                } else {
                    store.write(page_id, node.encode()?)?;
                    Ok(None)
                }
            }
            NodeKind::Internal => {
                let mut node = InternalNode::decode(&data)?;
                let idx = node.child_index(key);
                let child = node.child(idx);

                let Some((separator, right_id)) = Self::insert_into(store, child, key, value)?
                else {
                    return Ok(None);
                };

                node.insert_split(idx, separator, right_id);
                if node.overflows() {
                    let (right, promoted) = node.split();
                    let new_right_id = store.allocate()?;
                    store.write(new_right_id, right.encode()?)?;
                    store.write(page_id, node.encode()?)?;
                    Ok(Some((promoted, new_right_id)))
                } else {
                    store.write(page_id, node.encode()?)?;
                    Ok(None)
                }
            }
        }
    }

    /// Remove a record. Fails with `NotFound` (leaving the tree untouched)
    /// when the key is absent.
    pub fn delete<S: PageStore>(&mut self, store: &mut S, key: &[u8]) -> Result<()> {
        Self::delete_from(store, self.root, key)?;

        // An internal root left with a single child hands the root role to
        // that child, shrinking the tree by one level.
        loop {
            let data = store.read(self.root)?;
            match node_kind(&data)? {
                NodeKind::Internal => {
                    let node = InternalNode::decode(&data)?;
                    if node.keys.is_empty() {
                        let child = node.child(0);
                        store.free(self.root)?;
                        self.root = child;
                        continue;
                    }
                }
                NodeKind::Leaf => {}
            }
            break;
        }
        Ok(())
    }

    /// Recursive delete; the return value reports whether `page_id` ended up
    /// underfull so the parent can rebalance it.
    fn delete_from<S: PageStore>(store: &mut S, page_id: PageId, key: &[u8]) -> Result<bool> {
        let data = store.read(page_id)?;
        match node_kind(&data)? {
            NodeKind::Leaf => {
                let mut node = LeafNode::decode(&data)?;
                match node.search(key) {
                    Ok(pos) => {
                        node.entries.remove(pos);
                    }
                    Err(_) => return Err(Error::NotFound),
                }
                let underfull = node.is_underfull();
                store.write(page_id, node.encode()?)?;
                Ok(underfull)
            }
            NodeKind::Internal => {
                let mut node = InternalNode::decode(&data)?;
                let idx = node.child_index(key);
                let child = node.child(idx);

                if !Self::delete_from(store, child, key)? {
                    return Ok(false);
                }

                Self::rebalance_child(store, &mut node, idx)?;
                let underfull = node.is_underfull();
                store.write(page_id, node.encode()?)?;
                Ok(underfull)
            }
        }
    }

    /// Fix up an underfull child by folding it into a neighbor. When the
    /// fold overflows, it is re-split at the median, which redistributes
    /// entries between the two (sibling borrowing).
    fn rebalance_child<S: PageStore>(
        store: &mut S,
        parent: &mut InternalNode,
        idx: usize,
    ) -> Result<()> {
        if parent.children.len() < 2 {
            return Ok(());
        }
        let left_pos = if idx + 1 == parent.children.len() {
            idx - 1
        } else {
            idx
        };
        let left_id = parent.children[left_pos];
        let right_id = parent.children[left_pos + 1];

        let left_data = store.read(left_id)?;
        match node_kind(&left_data)? {
            NodeKind::Leaf => {
                let mut left = LeafNode::decode(&left_data)?;
                let right = LeafNode::decode(&*store.read(right_id)?)?;
                left.merge_with(right);

                if left.overflows() {
                    let (new_right, separator) = left.split();
                    left.next = Some(right_id);
                    store.write(right_id, new_right.encode()?)?;
                    store.write(left_id, left.encode()?)?;
                    parent.keys[left_pos] = separator;
                } else {
                    store.write(left_id, left.encode()?)?;
                    parent.keys.remove(left_pos);
                    parent.children.remove(left_pos + 1);
                    store.free(right_id)?;
                }
            }
            NodeKind::Internal => {
                let mut left = InternalNode::decode(&left_data)?;
                let right = InternalNode::decode(&*store.read(right_id)?)?;
                let separator = parent.keys[left_pos].clone();
                left.merge_with(separator, right);

                if left.overflows() {
                    let (new_right, promoted) = left.split();
                    store.write(right_id, new_right.encode()?)?;
                    store.write(left_id, left.encode()?)?;
                    parent.keys[left_pos] = promoted;
                } else {
                    store.write(left_id, left.encode()?)?;
                    parent.keys.remove(left_pos);
                    parent.children.remove(left_pos + 1);
                    store.free(right_id)?;
                }
            }
        }
        Ok(())
    }

    /// Open a cursor over `[lo, hi]`, ordered by key ascending. The cursor
    /// owns its decoded leaf, so concurrent structural changes staged by
    /// other transactions cannot disturb an in-progress scan.
    pub fn range_scan<S: PageStore>(
        &self,
        store: &mut S,
        lo: Bound<&[u8]>,
        hi: Bound<&[u8]>,
    ) -> Result<RangeScan> {
        let start_key: Option<&[u8]> = match lo {
            Bound::Included(k) | Bound::Excluded(k) => Some(k),
            Bound::Unbounded => None,
        };

        let mut page_id = self.root;
        let leaf = loop {
            let data = store.read(page_id)?;
            match node_kind(&data)? {
                NodeKind::Internal => {
                    let node = InternalNode::decode(&data)?;
                    page_id = match start_key {
                        Some(key) => node.child(node.child_index(key)),
                        None => node.child(0),
                    };
                }
                NodeKind::Leaf => break LeafNode::decode(&data)?,
            }
        };

        let idx = match lo {
            Bound::Unbounded => 0,
            Bound::Included(key) => leaf.search(key).unwrap_or_else(|i| i),
            Bound::Excluded(key) => match leaf.search(key) {
                Ok(i) => i + 1,
                Err(i) => i,
            },
        };

        Ok(RangeScan {
            hi: match hi {
                Bound::Included(k) => Bound::Included(k.to_vec()),
                Bound::Excluded(k) => Bound::Excluded(k.to_vec()),
                Bound::Unbounded => Bound::Unbounded,
            },
            leaf,
            idx,
            done: false,
        })
    }

    /// Release every page of the tree. Consumes the handle; used by DROP.
    pub fn destroy<S: PageStore>(self, store: &mut S) -> Result<()> {
        Self::destroy_from(store, self.root)
    }

    fn destroy_from<S: PageStore>(store: &mut S, page_id: PageId) -> Result<()> {
        let data = store.read(page_id)?;
        if let NodeKind::Internal = node_kind(&data)? {
            let node = InternalNode::decode(&data)?;
            for child in &node.children {
                Self::destroy_from(store, *child)?;
            }
        }
        store.free(page_id)
    }
}

/// Lazy ascending cursor produced by [`BTree::range_scan`].
pub struct RangeScan {
    hi: Bound<Vec<u8>>,
    leaf: LeafNode,
    idx: usize,
    done: bool,
}

impl RangeScan {
    pub fn next<S: PageStore>(&mut self, store: &mut S) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if self.idx >= self.leaf.entries.len() {
                match self.leaf.next {
                    Some(next) => {
                        self.leaf = LeafNode::decode(&*store.read(next)?)?;
                        self.idx = 0;
                        continue;
                    }
                    None => {
                        self.done = true;
                        return Ok(None);
                    }
                }
            }

            let (key, value) = &self.leaf.entries[self.idx];
            let within = match &self.hi {
                Bound::Unbounded => true,
                Bound::Included(h) => key <= h,
                Bound::Excluded(h) => key < h,
            };
            if !within {
                self.done = true;
                return Ok(None);
            }
            self.idx += 1;
            return Ok(Some((key.clone(), value.clone())));
        }
    }
}
