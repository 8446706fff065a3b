//! Statistics walker and tree printer.

use super::page::Node;
use super::sorted::MAX_SPACE;
use super::tree::{load_node, BTreeFile};
use std::fmt::Write as _;
use tern_common::page::PageId;
use tern_common::{Result, TernError};

/// Min/max/average fill factor over pages of one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FillStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl FillStats {
    fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &s in samples {
            min = min.min(s);
            max = max.max(s);
            sum += s;
        }
        Self {
            min,
            max,
            avg: sum / samples.len() as f64,
        }
    }
}

/// Aggregate statistics over the whole tree.
#[derive(Debug, Clone, Default)]
pub struct TreeStats {
    /// Number of index pages.
    pub index_pages: usize,
    /// Number of leaf pages.
    pub leaf_pages: usize,
    /// Number of separator entries across index pages.
    pub index_entries: usize,
    /// Number of data entries across leaf pages.
    pub leaf_entries: usize,
    /// Edges from the root to any leaf. 0 for an empty tree or a
    /// single-leaf root; every leaf sits at the same depth.
    pub height: usize,
    /// Fill factors over leaf pages.
    pub leaf_fill: FillStats,
    /// Fill factors over index pages.
    pub index_fill: FillStats,
}

#[derive(Default)]
struct Walk {
    index_pages: usize,
    leaf_pages: usize,
    index_entries: usize,
    leaf_entries: usize,
    leaf_depth: Option<usize>,
    leaf_fills: Vec<f64>,
    index_fills: Vec<f64>,
}

fn fill_factor(available_space: usize) -> f64 {
    1.0 - available_space as f64 / MAX_SPACE as f64
}

impl BTreeFile {
    /// Walks the tree and aggregates page counts, entry counts, height,
    /// and per-kind fill factors. Read-only and pin-clean.
    pub fn stats(&self) -> Result<TreeStats> {
        let mut walk = Walk::default();
        if let Some(root) = self.root()? {
            self.collect_stats(root, 0, &mut walk)?;
        }
        Ok(TreeStats {
            index_pages: walk.index_pages,
            leaf_pages: walk.leaf_pages,
            index_entries: walk.index_entries,
            leaf_entries: walk.leaf_entries,
            height: walk.leaf_depth.unwrap_or(0),
            leaf_fill: FillStats::from_samples(&walk.leaf_fills),
            index_fill: FillStats::from_samples(&walk.index_fills),
        })
    }

    fn collect_stats(&self, page_id: PageId, depth: usize, walk: &mut Walk) -> Result<()> {
        let children = {
            let guard = self.pool().pin(page_id)?;
            match load_node(&guard)? {
                Node::Leaf(leaf) => {
                    match walk.leaf_depth {
                        None => walk.leaf_depth = Some(depth),
                        Some(expected) if expected != depth => {
                            return Err(TernError::TreeCorrupted(format!(
                                "leaf {page_id} at depth {depth}, expected {expected}"
                            )));
                        }
                        Some(_) => {}
                    }
                    walk.leaf_pages += 1;
                    walk.leaf_entries += leaf.num_entries() as usize;
                    walk.leaf_fills.push(fill_factor(leaf.available_space()));
                    Vec::new()
                }
                Node::Index(index) => {
                    walk.index_pages += 1;
                    walk.index_entries += index.num_entries() as usize;
                    walk.index_fills.push(fill_factor(index.available_space()));

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
            self.collect_stats(child, depth + 1, walk)?;
        }
        Ok(())
    }

    /// Renders the whole tree into a string, one page per block, children
    /// after their parent. Read-only and pin-clean.
    pub fn print(&self) -> Result<String> {
        let mut out = String::new();
        match self.root()? {
            Some(root) => {
                let _ = writeln!(out, "B+ tree '{}', root {}", self.name(), root);
                self.print_node(root, 0, &mut out)?;
            }
            None => {
                let _ = writeln!(out, "B+ tree '{}', empty", self.name());
            }
        }
        Ok(out)
    }

    fn print_node(&self, page_id: PageId, depth: usize, out: &mut String) -> Result<()> {
        let indent = "  ".repeat(depth);
        let children = {
            let guard = self.pool().pin(page_id)?;
            match load_node(&guard)? {
                Node::Leaf(leaf) => {
                    let _ = writeln!(
                        out,
                        "{indent}leaf {page_id} ({} entries)",
                        leaf.num_entries()
                    );
                    for slot in 0..leaf.num_entries() {
                        if let Some((key, rid)) = leaf.entry(slot) {
                            let _ = writeln!(
                                out,
                                "{indent}  {:?} -> {rid}",
                                String::from_utf8_lossy(key)
                            );
                        }
                    }
                    Vec::new()
                }
                Node::Index(index) => {
                    let left = index
                        .left_link()
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "none".to_string());
                    let _ = writeln!(
                        out,
                        "{indent}index {page_id} (left {left}, {} separators)",
                        index.num_entries()
                    );
                    let mut children = Vec::with_capacity(index.num_entries() as usize + 1);
                    if let Some(left) = index.left_link() {
                        children.push(left);
                    }
                    for slot in 0..index.num_entries() {
                        if let Some((key, child)) = index.entry(slot) {
                            let _ = writeln!(
                                out,
                                "{indent}  {:?} -> {child}",
                                String::from_utf8_lossy(key)
                            );
                            children.push(child);
                        }
                    }
                    children
                }
            }
        };
        for child in children {
            self.print_node(child, depth + 1, out)?;
        }
        Ok(())
    }
}
