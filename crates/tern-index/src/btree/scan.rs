//! Range-scan cursor over the leaf sibling chain.

use super::key::key_cmp;
use super::page::Node;
use super::tree::load_node;
use bytes::Bytes;
use std::sync::Arc;
use tern_buffer::{BufferPool, PageGuard};
use tern_common::page::Rid;
use tern_common::{Result, TernError};

/// Cursor over a key range of the tree.
///
/// Produced by `BTreeFile::open_scan`; delivers `(key, rid)` entries in key
/// order, crossing leaf boundaries transparently. The cursor owns at most
/// one pinned leaf at a time; the pin moves with the cursor and is released
/// when the scan is exhausted, hits the upper bound, or is dropped.
pub struct BTreeScan {
    pool: Arc<BufferPool>,
    /// Currently pinned leaf; `None` once the scan is exhausted.
    leaf: Option<PageGuard>,
    /// Slot of the next entry to deliver.
    slot: u16,
    /// Inclusive upper bound.
    high: Option<Bytes>,
}

impl BTreeScan {
    /// A scan with nothing to deliver.
    pub(crate) fn exhausted(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            leaf: None,
            slot: 0,
            high: None,
        }
    }

    /// A scan positioned on its first qualifying entry.
    pub(crate) fn positioned(
        pool: Arc<BufferPool>,
        leaf: PageGuard,
        slot: u16,
        high: Option<Bytes>,
    ) -> Self {
        Self {
            pool,
            leaf: Some(leaf),
            slot,
            high,
        }
    }

    /// Returns true once the scan has delivered its last entry.
    pub fn is_exhausted(&self) -> bool {
        self.leaf.is_none()
    }

    /// Delivers the next entry, or `None` when the range is exhausted.
    ///
    /// `None` is only returned on a call that delivers nothing: a key past
    /// the upper bound exhausts the scan on the call that reads it, before
    /// anything is returned.
    pub fn next(&mut self) -> Result<Option<(Bytes, Rid)>> {
        loop {
            let Some(guard) = &self.leaf else {
                return Ok(None);
            };
            let leaf = match load_node(guard)? {
                Node::Leaf(leaf) => leaf,
                Node::Index(_) => {
                    return Err(TernError::TreeCorrupted(
                        "scan cursor pinned an index node".into(),
                    ))
                }
            };

            if self.slot < leaf.num_entries() {
                let (key, rid) = leaf
                    .entry(self.slot)
                    .ok_or_else(|| TernError::TreeCorrupted("leaf slot out of range".into()))?;
                if let Some(high) = &self.high {
                    if key_cmp(key, high).is_gt() {
                        self.leaf = None; // releases the pin
                        return Ok(None);
                    }
                }
                let key = Bytes::copy_from_slice(key);
                self.slot += 1;
                return Ok(Some((key, rid)));
            }

            // Leaf exhausted: move to the next sibling, releasing the
            // current pin first so at most one leaf is held.
            let next = leaf.next_page();
            self.leaf = None;
            match next {
                Some(next_id) => {
                    self.leaf = Some(self.pool.pin(next_id)?);
                    self.slot = 0;
                }
                None => return Ok(None),
            }
        }
    }
}

impl std::fmt::Debug for BTreeScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeScan")
            .field("leaf", &self.leaf.as_ref().map(|g| g.page_id()))
            .field("slot", &self.slot)
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}
