//! Persistent B+ tree index for TernDB.
//!
//! This crate provides:
//! - A sorted slotted page primitive shared by both node kinds
//! - Leaf and index node wrappers with sibling links and child lookup
//! - The tree engine: search, insert with split propagation, delete, destroy
//! - A range-scan cursor over the leaf sibling chain
//! - A statistics walker and tree printer
//! - The file catalog mapping index names to header pages
//!
//! All pages are served through the `tern-buffer` pool; the index never
//! touches raw storage directly. Operations are strictly synchronous and
//! pin-accounted: every page pinned by an operation is released before the
//! operation returns, on success and on error alike.

pub mod btree;
pub mod catalog;

pub use btree::key::{entry_size, key_cmp, MAX_KEY_SIZE};
pub use btree::page::{IndexPage, LeafPage, Node};
pub use btree::scan::BTreeScan;
pub use btree::sorted::{NodeKind, SortedPage, MAX_SPACE, SLOT_SIZE};
pub use btree::stats::{FillStats, TreeStats};
pub use btree::tree::BTreeFile;
pub use catalog::FileCatalog;
