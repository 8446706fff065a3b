//! Error types for TernDB.

use thiserror::Error;

/// Result type alias using TernError.
pub type Result<T> = std::result::Result<T, TernError>;

/// Errors that can occur in TernDB operations.
#[derive(Debug, Error)]
pub enum TernError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer pool errors
    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u32 },

    #[error("Page {page_id} is pinned and cannot be freed")]
    PagePinned { page_id: u32 },

    // Page-level errors
    #[error("Page full, unable to insert entry")]
    PageFull,

    #[error("Invalid node type tag: {tag}")]
    InvalidNodeType { tag: u16 },

    // Index errors
    #[error("Key not found")]
    KeyNotFound,

    #[error("Key too large: {size} bytes (max {max})")]
    KeyTooLarge { size: usize, max: usize },

    #[error("Index is closed")]
    IndexClosed,

    #[error("B+ tree corrupted: {0}")]
    TreeCorrupted(String),

    // Catalog errors
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let tern_err: TernError = io_err.into();
        assert!(matches!(tern_err, TernError::Io(_)));
        assert!(tern_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_errors_display() {
        let err = TernError::PageNotFound { page_id: 42 };
        assert_eq!(err.to_string(), "Page not found: 42");

        let err = TernError::PagePinned { page_id: 7 };
        assert_eq!(err.to_string(), "Page 7 is pinned and cannot be freed");

        let err = TernError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_index_errors_display() {
        let err = TernError::KeyTooLarge { size: 512, max: 256 };
        assert_eq!(err.to_string(), "Key too large: 512 bytes (max 256)");

        let err = TernError::InvalidNodeType { tag: 99 };
        assert_eq!(err.to_string(), "Invalid node type tag: 99");

        let err = TernError::TreeCorrupted("leaf chain broken".to_string());
        assert_eq!(err.to_string(), "B+ tree corrupted: leaf chain broken");
    }

    #[test]
    fn test_catalog_errors_display() {
        let err = TernError::FileNotFound("users_idx".to_string());
        assert_eq!(err.to_string(), "File not found: users_idx");

        let err = TernError::FileAlreadyExists("users_idx".to_string());
        assert_eq!(err.to_string(), "File already exists: users_idx");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(TernError::KeyNotFound)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TernError>();
    }
}
