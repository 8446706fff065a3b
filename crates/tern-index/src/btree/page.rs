//! B+ tree node wrappers over the sorted page primitive.

use super::key::key_cmp;
use super::sorted::{NodeKind, SortedPage};
use bytes::Bytes;
use tern_common::page::{PageId, Rid, PAGE_SIZE};
use tern_common::{Result, TernError};

/// B+ tree leaf node: sorted (key, Rid) entries plus the sibling chain.
pub struct LeafPage {
    page: SortedPage,
}

impl LeafPage {
    const PAYLOAD: usize = Rid::SIZE;

    /// Creates an empty leaf with no siblings.
    pub fn new() -> Self {
        Self {
            page: SortedPage::new(NodeKind::Leaf),
        }
    }

    /// Wraps an already-classified sorted page.
    pub fn from_sorted(page: SortedPage) -> Self {
        Self { page }
    }

    /// Returns the raw page data.
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        self.page.as_bytes()
    }

    /// Returns the number of entries.
    pub fn num_entries(&self) -> u16 {
        self.page.num_slots()
    }

    /// Returns the free space available for new entries.
    pub fn available_space(&self) -> usize {
        self.page.available_space()
    }

    /// Inserts an entry in sorted position; equal keys append after
    /// existing equals. Returns `PageFull` when the entry does not fit.
    pub fn insert(&mut self, key: &[u8], rid: Rid) -> Result<u16> {
        self.page.insert(key, &rid.to_bytes())
    }

    /// Returns the entry at a slot.
    pub fn entry(&self, slot: u16) -> Option<(&[u8], Rid)> {
        let record = self.page.record(slot)?;
        let split = record.len() - Self::PAYLOAD;
        Some((&record[..split], Rid::from_bytes(&record[split..])))
    }

    /// Returns the smallest key on the page.
    pub fn first_key(&self) -> Option<&[u8]> {
        self.entry(0).map(|(key, _)| key)
    }

    /// Returns the largest key on the page.
    pub fn last_key(&self) -> Option<&[u8]> {
        let n = self.num_entries();
        if n == 0 {
            return None;
        }
        self.entry(n - 1).map(|(key, _)| key)
    }

    /// Returns the slot of the first entry with key >= the target.
    pub fn search(&self, key: &[u8]) -> Option<u16> {
        self.page.search(key, Self::PAYLOAD)
    }

    /// Removes the first entry matching both key and rid.
    pub fn delete_key_rid(&mut self, key: &[u8], rid: Rid) -> Result<()> {
        let mut slot = self.search(key).ok_or(TernError::KeyNotFound)?;
        while let Some((entry_key, entry_rid)) = self.entry(slot) {
            if !key_cmp(entry_key, key).is_eq() {
                break;
            }
            if entry_rid == rid {
                return self.page.delete_slot(slot);
            }
            slot += 1;
        }
        Err(TernError::KeyNotFound)
    }

    /// Removes and returns the first entry.
    pub fn pop_first(&mut self) -> Result<Option<(Bytes, Rid)>> {
        match self.entry(0) {
            Some((key, rid)) => {
                let key = Bytes::copy_from_slice(key);
                self.page.delete_slot(0)?;
                Ok(Some((key, rid)))
            }
            None => Ok(None),
        }
    }

    /// Returns the next-leaf link of the sibling chain.
    pub fn next_page(&self) -> Option<PageId> {
        self.page.next_page()
    }

    /// Sets the next-leaf link.
    pub fn set_next_page(&mut self, page_id: Option<PageId>) {
        self.page.set_next_page(page_id);
    }

    /// Returns the previous-leaf link of the sibling chain.
    pub fn prev_page(&self) -> Option<PageId> {
        self.page.prev_page()
    }

    /// Sets the previous-leaf link.
    pub fn set_prev_page(&mut self, page_id: Option<PageId>) {
        self.page.set_prev_page(page_id);
    }
}

impl Default for LeafPage {
    fn default() -> Self {
        Self::new()
    }
}

/// B+ tree index node: sorted (key, child) separators plus the left link.
///
/// A separator `(k, c)` means child `c` covers keys in `[k, next separator)`.
/// The left link covers keys strictly below the first separator; it is kept
/// in the sorted page's prev-page field.
pub struct IndexPage {
    page: SortedPage,
}

impl IndexPage {
    const PAYLOAD: usize = 4;

    /// Creates an empty index node with no left link.
    pub fn new() -> Self {
        Self {
            page: SortedPage::new(NodeKind::Index),
        }
    }

    /// Wraps an already-classified sorted page.
    pub fn from_sorted(page: SortedPage) -> Self {
        Self { page }
    }

    /// Returns the raw page data.
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        self.page.as_bytes()
    }

    /// Returns the number of separators.
    pub fn num_entries(&self) -> u16 {
        self.page.num_slots()
    }

    /// Returns the free space available for new separators.
    pub fn available_space(&self) -> usize {
        self.page.available_space()
    }

    /// Inserts a separator in sorted position.
    pub fn insert(&mut self, key: &[u8], child: PageId) -> Result<u16> {
        self.page.insert(key, &child.to_bytes())
    }

    /// Returns the separator at a slot.
    pub fn entry(&self, slot: u16) -> Option<(&[u8], PageId)> {
        let record = self.page.record(slot)?;
        let split = record.len() - Self::PAYLOAD;
        let child = PageId::from_bytes([
            record[split],
            record[split + 1],
            record[split + 2],
            record[split + 3],
        ]);
        Some((&record[..split], child))
    }

    /// Returns the smallest separator key on the page.
    pub fn first_key(&self) -> Option<&[u8]> {
        self.entry(0).map(|(key, _)| key)
    }

    /// Returns the leftmost-child link.
    pub fn left_link(&self) -> Option<PageId> {
        self.page.prev_page()
    }

    /// Sets the leftmost-child link.
    pub fn set_left_link(&mut self, page_id: PageId) {
        self.page.set_prev_page(Some(page_id));
    }

    /// Finds the child responsible for a key: the child of the greatest
    /// separator <= the key, or the left link when every separator is
    /// greater. A key equal to a separator belongs to that separator's
    /// (right) child.
    pub fn find_child(&self, key: &[u8]) -> Result<PageId> {
        // First slot with separator key > the target.
        let num = self.num_entries();
        let mut low = 0u16;
        let mut high = num;
        while low < high {
            let mid = low + (high - low) / 2;
            let (sep, _) = self
                .entry(mid)
                .ok_or_else(|| TernError::TreeCorrupted("separator slot out of range".into()))?;
            if key_cmp(sep, key).is_gt() {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        if low == 0 {
            self.left_link()
                .ok_or_else(|| TernError::TreeCorrupted("index node without left link".into()))
        } else {
            self.entry(low - 1)
                .map(|(_, child)| child)
                .ok_or_else(|| TernError::TreeCorrupted("separator slot out of range".into()))
        }
    }

    /// Removes and returns the first separator.
    pub fn pop_first(&mut self) -> Result<Option<(Bytes, PageId)>> {
        match self.entry(0) {
            Some((key, child)) => {
                let key = Bytes::copy_from_slice(key);
                self.page.delete_slot(0)?;
                Ok(Some((key, child)))
            }
            None => Ok(None),
        }
    }
}

impl Default for IndexPage {
    fn default() -> Self {
        Self::new()
    }
}

/// A classified tree node.
pub enum Node {
    Leaf(LeafPage),
    Index(IndexPage),
}

impl Node {
    /// Classifies a raw page by its node-type tag. Unknown tags surface as
    /// `InvalidNodeType`, the corruption signal.
    pub fn from_bytes(data: &[u8; PAGE_SIZE]) -> Result<Node> {
        let page = SortedPage::from_bytes(data);
        match page.node_kind()? {
            NodeKind::Leaf => Ok(Node::Leaf(LeafPage::from_sorted(page))),
            NodeKind::Index => Ok(Node::Index(IndexPage::from_sorted(page))),
        }
    }
}
