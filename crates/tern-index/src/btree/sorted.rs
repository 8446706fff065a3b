//! Sorted slotted page primitive.
//!
//! Stores a sorted sequence of variable-length records (`key ++ payload`)
//! behind a slot directory. The payload width is fixed per node kind, so a
//! record's key length is its slot length minus the payload width; callers
//! supply the width. Equal keys are kept in arrival order: a new record is
//! placed after all existing records with the same key.

use super::key::key_cmp;
use tern_common::page::{PageId, PAGE_SIZE};
use tern_common::{Result, TernError};

/// Size of the page header in bytes.
pub const SORTED_HEADER_SIZE: usize = 16;

/// Size of each slot directory entry (offset: 2 + len: 2).
pub const SLOT_SIZE: usize = 4;

/// Usable capacity of a sorted page; the reference point for fill factors.
pub const MAX_SPACE: usize = PAGE_SIZE - SORTED_HEADER_SIZE;

/// Node kind tag stored in the page header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NodeKind {
    /// Leaf node: (key, Rid) entries plus sibling links.
    Leaf = 1,
    /// Index node: (key, child PageId) separators plus a left link.
    Index = 2,
}

impl NodeKind {
    /// Fixed payload width for this node kind.
    pub fn payload_size(self) -> usize {
        match self {
            NodeKind::Leaf => tern_common::Rid::SIZE,
            NodeKind::Index => 4,
        }
    }

    /// Decodes a header tag. Unknown tags indicate corruption.
    pub fn from_tag(tag: u16) -> Result<Self> {
        match tag {
            1 => Ok(NodeKind::Leaf),
            2 => Ok(NodeKind::Index),
            _ => Err(TernError::InvalidNodeType { tag }),
        }
    }
}

/// A sorted slotted page over a fixed-size buffer.
///
/// Header layout (16 bytes):
/// - node_type: 2 bytes
/// - num_slots: 2 bytes
/// - data_end: 2 bytes (entry data grows backward from PAGE_SIZE)
/// - reserved: 2 bytes
/// - next_page: 4 bytes
/// - prev_page: 4 bytes
pub struct SortedPage {
    data: Box<[u8; PAGE_SIZE]>,
}

impl SortedPage {
    /// Creates an empty page of the given kind with no sibling links.
    pub fn new(kind: NodeKind) -> Self {
        let mut page = Self {
            data: Box::new([0u8; PAGE_SIZE]),
        };
        page.write_u16(0, kind as u16);
        page.write_u16(2, 0);
        page.write_u16(4, PAGE_SIZE as u16);
        page.data[8..12].copy_from_slice(&PageId::INVALID.to_bytes());
        page.data[12..16].copy_from_slice(&PageId::INVALID.to_bytes());
        page
    }

    /// Creates a page from a raw buffer copy.
    pub fn from_bytes(data: &[u8; PAGE_SIZE]) -> Self {
        Self {
            data: Box::new(*data),
        }
    }

    /// Returns the raw page data.
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    #[inline]
    fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    #[inline]
    fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Returns the node kind stored in the header.
    pub fn node_kind(&self) -> Result<NodeKind> {
        NodeKind::from_tag(self.read_u16(0))
    }

    /// Returns the number of records on this page.
    pub fn num_slots(&self) -> u16 {
        self.read_u16(2)
    }

    #[inline]
    fn data_end(&self) -> usize {
        self.read_u16(4) as usize
    }

    /// Returns the free space between the slot directory and the entry data.
    pub fn available_space(&self) -> usize {
        let slot_array_end = SORTED_HEADER_SIZE + self.num_slots() as usize * SLOT_SIZE;
        self.data_end().saturating_sub(slot_array_end)
    }

    /// Returns the next-page link.
    pub fn next_page(&self) -> Option<PageId> {
        PageId::from_bytes([self.data[8], self.data[9], self.data[10], self.data[11]]).to_option()
    }

    /// Sets the next-page link.
    pub fn set_next_page(&mut self, page_id: Option<PageId>) {
        self.data[8..12].copy_from_slice(&PageId::from_option(page_id).to_bytes());
    }

    /// Returns the prev-page link.
    pub fn prev_page(&self) -> Option<PageId> {
        PageId::from_bytes([self.data[12], self.data[13], self.data[14], self.data[15]]).to_option()
    }

    /// Sets the prev-page link.
    pub fn set_prev_page(&mut self, page_id: Option<PageId>) {
        self.data[12..16].copy_from_slice(&PageId::from_option(page_id).to_bytes());
    }

    #[inline]
    fn slot(&self, index: u16) -> (usize, usize) {
        let slot_offset = SORTED_HEADER_SIZE + index as usize * SLOT_SIZE;
        let offset = self.read_u16(slot_offset) as usize;
        let len = self.read_u16(slot_offset + 2) as usize;
        (offset, len)
    }

    /// Returns the raw record bytes (key ++ payload) at a slot.
    pub fn record(&self, index: u16) -> Option<&[u8]> {
        if index >= self.num_slots() {
            return None;
        }
        let (offset, len) = self.slot(index);
        Some(&self.data[offset..offset + len])
    }

    /// Returns the key part of the record at a slot.
    fn key_at(&self, index: u16, payload_size: usize) -> &[u8] {
        let (offset, len) = self.slot(index);
        &self.data[offset..offset + len - payload_size]
    }

    /// Inserts a record keeping the slot directory sorted by key. A record
    /// whose key equals existing keys is placed after them. Returns the
    /// slot index, or `PageFull` when the record plus its slot do not fit.
    pub fn insert(&mut self, key: &[u8], payload: &[u8]) -> Result<u16> {
        let record_len = key.len() + payload.len();
        if self.available_space() < record_len + SLOT_SIZE {
            return Err(TernError::PageFull);
        }

        // First slot with key greater than the new key; equal keys sort
        // before the new record so arrival order is preserved.
        let num_slots = self.num_slots();
        let mut low = 0u16;
        let mut high = num_slots;
        while low < high {
            let mid = low + (high - low) / 2;
            if key_cmp(self.key_at(mid, payload.len()), key).is_gt() {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        let position = low;

        // Write the record at the end of free space.
        let new_data_end = self.data_end() - record_len;
        self.data[new_data_end..new_data_end + key.len()].copy_from_slice(key);
        self.data[new_data_end + key.len()..new_data_end + record_len].copy_from_slice(payload);

        // Shift slots to make room.
        let insert_offset = SORTED_HEADER_SIZE + position as usize * SLOT_SIZE;
        let slot_array_end = SORTED_HEADER_SIZE + num_slots as usize * SLOT_SIZE;
        self.data
            .copy_within(insert_offset..slot_array_end, insert_offset + SLOT_SIZE);

        self.write_u16(insert_offset, new_data_end as u16);
        self.write_u16(insert_offset + 2, record_len as u16);
        self.write_u16(2, num_slots + 1);
        self.write_u16(4, new_data_end as u16);
        Ok(position)
    }

    /// Removes the record at a slot, compacting the entry data so the freed
    /// bytes become available again.
    pub fn delete_slot(&mut self, index: u16) -> Result<()> {
        let num_slots = self.num_slots();
        if index >= num_slots {
            return Err(TernError::KeyNotFound);
        }

        // Collect surviving records in slot order, then rebuild the page.
        let mut records: Vec<Vec<u8>> = Vec::with_capacity(num_slots as usize - 1);
        for slot in 0..num_slots {
            if slot == index {
                continue;
            }
            let (offset, len) = self.slot(slot);
            records.push(self.data[offset..offset + len].to_vec());
        }

        let mut data_end = PAGE_SIZE;
        for (slot, record) in records.iter().enumerate() {
            data_end -= record.len();
            self.data[data_end..data_end + record.len()].copy_from_slice(record);
            let slot_offset = SORTED_HEADER_SIZE + slot * SLOT_SIZE;
            self.write_u16(slot_offset, data_end as u16);
            self.write_u16(slot_offset + 2, record.len() as u16);
        }

        self.write_u16(2, num_slots - 1);
        self.write_u16(4, data_end as u16);
        Ok(())
    }

    /// Returns the slot of the first record with key >= the target, or
    /// `None` when every key is smaller.
    pub fn search(&self, key: &[u8], payload_size: usize) -> Option<u16> {
        let num_slots = self.num_slots();
        let mut low = 0u16;
        let mut high = num_slots;
        while low < high {
            let mid = low + (high - low) / 2;
            if key_cmp(self.key_at(mid, payload_size), key).is_lt() {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        if low < num_slots {
            Some(low)
        } else {
            None
        }
    }
}

impl std::fmt::Debug for SortedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedPage")
            .field("node_kind", &self.node_kind())
            .field("num_slots", &self.num_slots())
            .field("available_space", &self.available_space())
            .field("next_page", &self.next_page())
            .field("prev_page", &self.prev_page())
            .finish()
    }
}
