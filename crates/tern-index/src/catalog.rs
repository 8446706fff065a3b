//! File catalog mapping index file names to header pages.

use parking_lot::Mutex;
use std::collections::HashMap;
use tern_common::page::PageId;
use tern_common::{Result, TernError};

/// Catalog of index files.
///
/// Maps each logical file name to the page ID of its header page. The tree
/// consults the catalog on open to find an existing file, registers new
/// files on creation, and removes the entry on destroy.
#[derive(Debug, Default)]
pub struct FileCatalog {
    entries: Mutex<HashMap<String, PageId>>,
}

impl FileCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the header page of a file.
    pub fn get_file_entry(&self, name: &str) -> Result<PageId> {
        self.entries
            .lock()
            .get(name)
            .copied()
            .ok_or_else(|| TernError::FileNotFound(name.to_string()))
    }

    /// Registers a new file.
    pub fn add_file_entry(&self, name: &str, header_id: PageId) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(name) {
            return Err(TernError::FileAlreadyExists(name.to_string()));
        }
        entries.insert(name.to_string(), header_id);
        Ok(())
    }

    /// Removes a file entry.
    pub fn delete_file_entry(&self, name: &str) -> Result<()> {
        self.entries
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| TernError::FileNotFound(name.to_string()))
    }

    /// Returns the number of registered files.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no files are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let catalog = FileCatalog::new();
        catalog.add_file_entry("users_idx", PageId(7)).unwrap();
        assert_eq!(catalog.get_file_entry("users_idx").unwrap(), PageId(7));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let catalog = FileCatalog::new();
        assert!(matches!(
            catalog.get_file_entry("nope"),
            Err(TernError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_add_duplicate() {
        let catalog = FileCatalog::new();
        catalog.add_file_entry("idx", PageId(1)).unwrap();
        assert!(matches!(
            catalog.add_file_entry("idx", PageId(2)),
            Err(TernError::FileAlreadyExists(_))
        ));
        // original entry untouched
        assert_eq!(catalog.get_file_entry("idx").unwrap(), PageId(1));
    }

    #[test]
    fn test_delete() {
        let catalog = FileCatalog::new();
        catalog.add_file_entry("idx", PageId(1)).unwrap();
        catalog.delete_file_entry("idx").unwrap();
        assert!(catalog.is_empty());
        assert!(matches!(
            catalog.delete_file_entry("idx"),
            Err(TernError::FileNotFound(_))
        ));
    }
}
