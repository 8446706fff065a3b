//! B+ tree index over buffer-pool pages.
//!
//! Node layout is built on a single sorted slotted-page primitive:
//!
//! ```text
//! +--------------------------+ 0
//! | Sorted header (16 bytes) |  node type, slot count, data end,
//! +--------------------------+ 16  next/prev page links
//! | Slot array               |
//! | [offset:2, len:2] * n    |  <- grows forward
//! +--------------------------+
//! |       Free space         |
//! +--------------------------+ data_end
//! | Entry data (key+payload) |  <- grows backward from PAGE_SIZE
//! +--------------------------+ PAGE_SIZE
//! ```
//!
//! Leaves store `(key, Rid)` entries and use the next/prev links as the
//! sibling chain; index nodes store `(key, child PageId)` separators and
//! keep the leftmost-child link in the prev-page field. Keys are
//! variable-length byte strings ordered by lexicographic comparison;
//! duplicates are allowed and kept in arrival order.

pub mod key;
pub mod page;
pub mod scan;
pub mod sorted;
pub mod stats;
pub mod tree;

pub use key::{entry_size, key_cmp, MAX_KEY_SIZE};
pub use page::{IndexPage, LeafPage, Node};
pub use scan::BTreeScan;
pub use sorted::{NodeKind, SortedPage, MAX_SPACE, SLOT_SIZE};
pub use stats::{FillStats, TreeStats};
pub use tree::BTreeFile;
