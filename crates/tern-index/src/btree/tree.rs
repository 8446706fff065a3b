//! B+ tree file: open/close/destroy, search, insert, delete.

use super::key::{entry_size, key_cmp, validate_key};
use super::page::{IndexPage, LeafPage, Node};
use super::scan::BTreeScan;
use super::sorted::NodeKind;
use bytes::Bytes;
use std::sync::Arc;
use tern_buffer::{BufferPool, PageGuard};
use tern_common::page::{PageId, Rid, PAGE_SIZE};
use tern_common::{Result, TernError};
use tracing::debug;

use crate::catalog::FileCatalog;

/// A separator promoted out of a split, to be installed one level up.
struct PromotedEntry {
    key: Bytes,
    child: PageId,
}

/// Reads a classified node out of a pinned page.
pub(crate) fn load_node(guard: &PageGuard) -> Result<Node> {
    let data = guard.read();
    Node::from_bytes(&data)
}

/// Writes a node image back to its pinned page and marks it dirty.
pub(crate) fn store_page(guard: &PageGuard, bytes: &[u8; PAGE_SIZE]) {
    guard.write().copy_from_slice(bytes);
    guard.mark_dirty();
}

/// A persistent B+ tree index file.
///
/// The handle pins the file's header page (which holds the root pointer)
/// for its whole lifetime; `close` releases it, `destroy` additionally
/// frees every tree page and removes the catalog entry.
///
/// Keys are byte strings up to `MAX_KEY_SIZE` bytes, non-unique; the value
/// stored with each key is an opaque `Rid`. Operations are single-threaded
/// and synchronous; every page pinned by an operation is unpinned before
/// the operation returns, whether it succeeds or fails.
pub struct BTreeFile {
    pool: Arc<BufferPool>,
    catalog: Arc<FileCatalog>,
    name: String,
    header_id: PageId,
    /// Pinned header page; `None` once the handle is closed or destroyed.
    header: Option<PageGuard>,
}

impl BTreeFile {
    /// Opens an index file, creating it if it does not exist.
    ///
    /// A fresh file gets a header page with an invalid root pointer and a
    /// catalog entry under `name`.
    pub fn open(pool: Arc<BufferPool>, catalog: Arc<FileCatalog>, name: &str) -> Result<Self> {
        match catalog.get_file_entry(name) {
            Ok(header_id) => {
                let header = pool.pin(header_id)?;
                Ok(Self {
                    pool,
                    catalog,
                    name: name.to_string(),
                    header_id,
                    header: Some(header),
                })
            }
            Err(TernError::FileNotFound(_)) => {
                let header = pool.new_page()?;
                let header_id = header.page_id();
                header.write()[0..4].copy_from_slice(&PageId::INVALID.to_bytes());
                header.mark_dirty();

                if let Err(e) = catalog.add_file_entry(name, header_id) {
                    drop(header);
                    let _ = pool.free_page(header_id);
                    return Err(e);
                }

                debug!(name, header = %header_id, "created index file");
                Ok(Self {
                    pool,
                    catalog,
                    name: name.to_string(),
                    header_id,
                    header: Some(header),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the header page ID.
    pub fn header_page_id(&self) -> PageId {
        self.header_id
    }

    /// Returns true if the handle is open.
    pub fn is_open(&self) -> bool {
        self.header.is_some()
    }

    pub(crate) fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    fn header_guard(&self) -> Result<&PageGuard> {
        self.header.as_ref().ok_or(TernError::IndexClosed)
    }

    /// Returns the current root page, or `None` for an empty tree.
    pub fn root(&self) -> Result<Option<PageId>> {
        let guard = self.header_guard()?;
        let data = guard.read();
        Ok(PageId::from_bytes([data[0], data[1], data[2], data[3]]).to_option())
    }

    fn set_root(&self, root: Option<PageId>) -> Result<()> {
        let guard = self.header_guard()?;
        guard.write()[0..4].copy_from_slice(&PageId::from_option(root).to_bytes());
        guard.mark_dirty();
        Ok(())
    }

    /// Closes the handle, releasing the header pin. Closing an already
    /// closed handle is an error.
    pub fn close(&mut self) -> Result<()> {
        match self.header.take() {
            Some(_guard) => Ok(()),
            None => Err(TernError::IndexClosed),
        }
    }

    /// Frees every tree page and the header, and removes the catalog
    /// entry. The handle is consumed.
    pub fn destroy(mut self) -> Result<()> {
        if let Some(root_id) = self.root()? {
            self.free_subtree(root_id)?;
        }
        // Release the header pin before freeing the page.
        self.header.take();
        self.pool.free_page(self.header_id)?;
        self.catalog.delete_file_entry(&self.name)?;
        debug!(name = %self.name, "destroyed index file");
        Ok(())
    }

    /// Post-order free of a subtree. Children are collected before the
    /// node's pin is released so no pin is held across recursion.
    fn free_subtree(&self, page_id: PageId) -> Result<()> {
        let children = {
            let guard = self.pool.pin(page_id)?;
            match load_node(&guard)? {
                Node::Leaf(_) => Vec::new(),
                Node::Index(index) => {
                    let mut children = Vec::with_capacity(index.num_entries() as usize + 1);
                    if let Some(left) = index.left_link() {
                        children.push(left);
                    }
                    for slot in 0..index.num_entries() {
                        if let Some((_, child)) = index.entry(slot) {
                            children.push(child);
                        }
                    }
                    children
                }
            }
        };
        for child in children {
            self.free_subtree(child)?;
        }
        self.pool.free_page(page_id)
    }

    /// Descends to the leaf page that would contain `key`, unpinning each
    /// parent before pinning the child. Returns `None` for an empty tree;
    /// the leaf itself is unpinned before its id is returned.
    pub fn search(&self, key: &[u8]) -> Result<Option<PageId>> {
        let Some(root) = self.root()? else {
            return Ok(None);
        };
        let mut current = root;
        loop {
            let guard = self.pool.pin(current)?;
            match load_node(&guard)? {
                Node::Leaf(_) => return Ok(Some(current)),
                Node::Index(index) => {
                    let child = index.find_child(key)?;
                    drop(guard);
                    current = child;
                }
            }
        }
    }

    /// Inserts a (key, rid) entry. Duplicate keys are preserved in
    /// arrival order; the tree grows only at the root.
    pub fn insert(&mut self, key: &[u8], rid: Rid) -> Result<()> {
        validate_key(key)?;

        let Some(root_id) = self.root()? else {
            // Empty tree: the first leaf becomes the root.
            let guard = self.pool.new_page()?;
            let mut leaf = LeafPage::new();
            leaf.insert(key, rid)?;
            store_page(&guard, leaf.as_bytes());
            self.set_root(Some(guard.page_id()))?;
            debug!(root = %guard.page_id(), "created root leaf");
            return Ok(());
        };

        if let Some(promoted) = self.insert_descend(root_id, key, rid)? {
            // The root split: grow the tree by one level.
            let guard = self.pool.new_page()?;
            let mut new_root = IndexPage::new();
            new_root.set_left_link(root_id);
            new_root.insert(&promoted.key, promoted.child)?;
            store_page(&guard, new_root.as_bytes());
            self.set_root(Some(guard.page_id()))?;
            debug!(root = %guard.page_id(), "tree grew one level");
        }
        Ok(())
    }

    /// Recursive insert. The current page stays pinned while its child is
    /// worked on; the guard releases the pin on every exit path. Returns
    /// the separator to install one level up when this page split.
    fn insert_descend(
        &self,
        page_id: PageId,
        key: &[u8],
        rid: Rid,
    ) -> Result<Option<PromotedEntry>> {
        let guard = self.pool.pin(page_id)?;
        match load_node(&guard)? {
            Node::Leaf(mut leaf) => {
                if leaf.available_space() >= entry_size(key, NodeKind::Leaf) {
                    leaf.insert(key, rid)?;
                    store_page(&guard, leaf.as_bytes());
                    Ok(None)
                } else {
                    self.split_leaf(&guard, &mut leaf, key, rid).map(Some)
                }
            }
            Node::Index(mut index) => {
                let child = index.find_child(key)?;
                let promoted = self.insert_descend(child, key, rid)?;
                let Some(entry) = promoted else {
                    return Ok(None);
                };
                if index.available_space() >= entry_size(&entry.key, NodeKind::Index) {
                    index.insert(&entry.key, entry.child)?;
                    store_page(&guard, index.as_bytes());
                    Ok(None)
                } else {
                    self.split_index(&guard, &mut index, entry).map(Some)
                }
            }
        }
    }

    /// Splits a full leaf: allocates a right sibling, rebalances at the
    /// space midpoint, places the pending entry on the side its key
    /// belongs to, and splices the sibling chain. Returns the promoted
    /// separator (the right page's smallest key). When the split fails
    /// before anything is stored, the freshly allocated right page is
    /// freed again instead of surviving as an unreachable orphan.
    fn split_leaf(
        &self,
        left_guard: &PageGuard,
        left: &mut LeafPage,
        key: &[u8],
        rid: Rid,
    ) -> Result<PromotedEntry> {
        let right_guard = self.pool.new_page()?;
        let right_id = right_guard.page_id();
        match self.split_leaf_into(left_guard, left, key, rid, &right_guard) {
            Ok(promoted) => Ok(promoted),
            Err(e) => {
                // Nothing was stored and nothing references the new page
                // yet; reclaim it before surfacing the error.
                drop(right_guard);
                let _ = self.pool.free_page(right_id);
                Err(e)
            }
        }
    }

    /// Fallible body of the leaf split. Every step that can fail runs
    /// before the first store, so the caller can reclaim the right page
    /// on any error.
    fn split_leaf_into(
        &self,
        left_guard: &PageGuard,
        left: &mut LeafPage,
        key: &[u8],
        rid: Rid,
        right_guard: &PageGuard,
    ) -> Result<PromotedEntry> {
        let right_id = right_guard.page_id();
        let mut right = LeafPage::new();

        Self::rebalance_leaf(left, &mut right)?;

        let pivot = Bytes::copy_from_slice(right.first_key().ok_or_else(|| {
            TernError::TreeCorrupted("right leaf empty after rebalance".into())
        })?);
        if key_cmp(key, &pivot).is_lt() {
            left.insert(key, rid)?;
        } else {
            right.insert(key, rid)?;
        }

        // Splice the new page into the sibling chain. The old sibling's
        // back link is the first page stored.
        let old_next = left.next_page();
        right.set_next_page(old_next);
        right.set_prev_page(Some(left_guard.page_id()));
        left.set_next_page(Some(right_id));
        if let Some(next_id) = old_next {
            let next_guard = self.pool.pin(next_id)?;
            match load_node(&next_guard)? {
                Node::Leaf(mut next_leaf) => {
                    next_leaf.set_prev_page(Some(right_id));
                    store_page(&next_guard, next_leaf.as_bytes());
                }
                Node::Index(_) => {
                    return Err(TernError::TreeCorrupted(
                        "leaf sibling is an index node".into(),
                    ))
                }
            }
        }

        store_page(left_guard, left.as_bytes());
        store_page(right_guard, right.as_bytes());
        debug!(left = %left_guard.page_id(), right = %right_id, "leaf split");

        Ok(PromotedEntry {
            key: pivot,
            child: right_id,
        })
    }

    /// Splits a full index node and installs the pending separator into
    /// whichever half owns its key range. Returns the separator promoted
    /// a further level up. As with leaf splits, a failure before the
    /// stores reclaims the freshly allocated right page.
    fn split_index(
        &self,
        left_guard: &PageGuard,
        left: &mut IndexPage,
        entry: PromotedEntry,
    ) -> Result<PromotedEntry> {
        let right_guard = self.pool.new_page()?;
        let right_id = right_guard.page_id();
        match Self::split_index_into(left_guard, left, &entry, &right_guard) {
            Ok(promoted) => Ok(promoted),
            Err(e) => {
                drop(right_guard);
                let _ = self.pool.free_page(right_id);
                Err(e)
            }
        }
    }

    /// Fallible body of the index split; nothing is stored until every
    /// fallible step has succeeded.
    fn split_index_into(
        left_guard: &PageGuard,
        left: &mut IndexPage,
        entry: &PromotedEntry,
        right_guard: &PageGuard,
    ) -> Result<PromotedEntry> {
        let right_id = right_guard.page_id();
        let mut right = IndexPage::new();

        let pivot = Self::rebalance_index(left, &mut right)?;

        if key_cmp(&entry.key, &pivot).is_lt() {
            left.insert(&entry.key, entry.child)?;
        } else {
            right.insert(&entry.key, entry.child)?;
        }

        store_page(left_guard, left.as_bytes());
        store_page(right_guard, right.as_bytes());
        debug!(left = %left_guard.page_id(), right = %right_id, "index split");

        Ok(PromotedEntry {
            key: pivot,
            child: right_id,
        })
    }

    /// Moves every entry of `left` to the empty `right`, then moves
    /// entries back until the free space is balanced. The net effect is a
    /// split at the space midpoint with order preserved.
    fn rebalance_leaf(left: &mut LeafPage, right: &mut LeafPage) -> Result<()> {
        while let Some((key, rid)) = left.pop_first()? {
            right.insert(&key, rid)?;
        }
        while left.available_space() > right.available_space() {
            // The loop condition keeps right non-empty: its available
            // space is below left's, so at least one entry remains.
            let Some((key, rid)) = right.pop_first()? else {
                return Err(TernError::TreeCorrupted(
                    "leaf rebalance ran out of entries".into(),
                ));
            };
            left.insert(&key, rid)?;
        }
        Ok(())
    }

    /// Same space-midpoint rebalance for index nodes, then pops the first
    /// separator of `right`: its child becomes `right`'s left link and its
    /// key is the pivot promoted to the parent. The pivot no longer
    /// appears inside `right` because it anchors the whole page.
    fn rebalance_index(left: &mut IndexPage, right: &mut IndexPage) -> Result<Bytes> {
        while let Some((key, child)) = left.pop_first()? {
            right.insert(&key, child)?;
        }
        while left.available_space() > right.available_space() {
            // The loop condition keeps right non-empty, as in the leaf
            // rebalance.
            let Some((key, child)) = right.pop_first()? else {
                return Err(TernError::TreeCorrupted(
                    "index rebalance ran out of entries".into(),
                ));
            };
            left.insert(&key, child)?;
        }
        // A split only runs on a full page, so the balanced right half
        // holds at least one separator to become the anchor.
        let Some((anchor_key, anchor_child)) = right.pop_first()? else {
            return Err(TernError::TreeCorrupted(
                "index rebalance produced an empty right page".into(),
            ));
        };
        right.set_left_link(anchor_child);
        Ok(anchor_key)
    }

    /// Finds the earliest leaf that can hold entries with the given key.
    ///
    /// Descent sends a key equal to a separator into the right child, so a
    /// run of duplicates may begin in an earlier sibling; this backs up the
    /// chain while the previous leaf cannot be ruled out.
    fn first_leaf_for(&self, key: &[u8]) -> Result<Option<PageId>> {
        let Some(mut current) = self.search(key)? else {
            return Ok(None);
        };
        loop {
            let prev = {
                let guard = self.pool.pin(current)?;
                match load_node(&guard)? {
                    Node::Leaf(leaf) => leaf.prev_page(),
                    Node::Index(_) => {
                        return Err(TernError::TreeCorrupted(
                            "descent landed on an index node".into(),
                        ))
                    }
                }
            };
            let Some(prev_id) = prev else {
                return Ok(Some(current));
            };
            let backs_up = {
                let guard = self.pool.pin(prev_id)?;
                match load_node(&guard)? {
                    // An empty leaf cannot rule out earlier duplicates.
                    Node::Leaf(leaf) => match leaf.last_key() {
                        Some(last) => !key_cmp(last, key).is_lt(),
                        None => true,
                    },
                    Node::Index(_) => {
                        return Err(TernError::TreeCorrupted(
                            "leaf sibling is an index node".into(),
                        ))
                    }
                }
            };
            if backs_up {
                current = prev_id;
            } else {
                return Ok(Some(current));
            }
        }
    }

    /// Deletes the first entry matching (key, rid).
    ///
    /// Starts from the earliest leaf that can hold the key; because
    /// duplicates may spill across sibling leaves, the search continues
    /// along the chain while the current leaf cannot rule the key out. No
    /// merging or redistribution happens: emptied pages stay in place
    /// until destroy.
    pub fn delete(&mut self, key: &[u8], rid: Rid) -> Result<()> {
        let Some(mut current) = self.first_leaf_for(key)? else {
            return Err(TernError::KeyNotFound);
        };
        loop {
            let guard = self.pool.pin(current)?;
            let mut leaf = match load_node(&guard)? {
                Node::Leaf(leaf) => leaf,
                Node::Index(_) => {
                    return Err(TernError::TreeCorrupted(
                        "descent landed on an index node".into(),
                    ))
                }
            };
            match leaf.delete_key_rid(key, rid) {
                Ok(()) => {
                    store_page(&guard, leaf.as_bytes());
                    return Ok(());
                }
                Err(TernError::KeyNotFound) => {
                    // Give up once this leaf holds a key beyond the target;
                    // otherwise the match may sit in a later sibling.
                    let past_key = match leaf.last_key() {
                        Some(last) => key_cmp(last, key).is_gt(),
                        None => false,
                    };
                    let next = leaf.next_page();
                    drop(guard);
                    match next {
                        Some(next_id) if !past_key => current = next_id,
                        _ => return Err(TernError::KeyNotFound),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Opens a range scan. Either bound may be absent; the upper bound is
    /// inclusive. The cursor independently pins leaves as it advances.
    pub fn open_scan(&self, low: Option<&[u8]>, high: Option<&[u8]>) -> Result<BTreeScan> {
        let start = low.unwrap_or(b"");
        let high = high.map(Bytes::copy_from_slice);

        // An unbounded low descends straight to the leftmost leaf; the
        // duplicate back-walk is only needed for a concrete start key,
        // and from the leftmost leaf there is nothing to back up over.
        let first_leaf = match low {
            Some(low_key) => self.first_leaf_for(low_key)?,
            None => self.search(start)?,
        };
        let Some(mut current) = first_leaf else {
            return Ok(BTreeScan::exhausted(Arc::clone(&self.pool)));
        };

        // Find the first leaf holding a qualifying entry, walking the
        // chain past leaves whose keys are all below the start key.
        loop {
            let guard = self.pool.pin(current)?;
            let leaf = match load_node(&guard)? {
                Node::Leaf(leaf) => leaf,
                Node::Index(_) => {
                    return Err(TernError::TreeCorrupted(
                        "descent landed on an index node".into(),
                    ))
                }
            };
            if let Some(slot) = leaf.search(start) {
                if let Some(hi) = &high {
                    let (first_key, _) = leaf.entry(slot).ok_or_else(|| {
                        TernError::TreeCorrupted("leaf slot out of range".into())
                    })?;
                    if key_cmp(first_key, hi).is_gt() {
                        // First qualifying key already beyond the bound.
                        return Ok(BTreeScan::exhausted(Arc::clone(&self.pool)));
                    }
                }
                return Ok(BTreeScan::positioned(
                    Arc::clone(&self.pool),
                    guard,
                    slot,
                    high,
                ));
            }
            let next = leaf.next_page();
            drop(guard);
            match next {
                Some(next_id) => current = next_id,
                None => return Ok(BTreeScan::exhausted(Arc::clone(&self.pool))),
            }
        }
    }
}

impl std::fmt::Debug for BTreeFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeFile")
            .field("name", &self.name)
            .field("header_id", &self.header_id)
            .field("open", &self.is_open())
            .finish()
    }
}
