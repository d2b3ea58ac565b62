//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Key encoding/decoding error
    #[error("Key error: {0}")]
    Key(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Store, type or item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A store already exists where a fresh one was requested
    #[error("Store already exists: {0}")]
    AlreadyExists(String),

    /// Rejected input (duplicate type names, illegal progress values)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Filesystem error outside RocksDB
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::NotFound("item 7".to_string());
        assert_eq!(err.to_string(), "Not found: item 7");

        let err = StoreError::AlreadyExists("/tmp/x.db".to_string());
        assert_eq!(err.to_string(), "Store already exists: /tmp/x.db");

        let err = StoreError::InvalidInput("duplicate type".to_string());
        assert_eq!(err.to_string(), "Invalid input: duplicate type");
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let store_err: StoreError = json_err.into();
        assert!(matches!(store_err, StoreError::Serialization(_)));
    }
}
