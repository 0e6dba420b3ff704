//! Storage error types
//!
//! Defines all errors that can occur in the node store and manifest layer.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The underlying SQLite database reported an error
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// The fixed-size node store is full and cannot grow
    #[error("Node store capacity exhausted ({capacity_bytes} bytes provisioned)")]
    CapacityExhausted { capacity_bytes: u64 },

    /// A write was attempted against a store opened read-only
    #[error("Node store is open read-only")]
    ReadOnly,

    /// A persisted node record could not be decoded
    #[error("Corrupt node record {id}: {reason}")]
    CorruptNode { id: String, reason: String },

    /// A dataset manifest is missing or malformed
    #[error("Manifest error in {path:?}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Database(err)
    }
}

impl StorageError {
    pub(crate) fn manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StorageError::Manifest {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Translate a SQLite error, recognising a full database as capacity exhaustion
    pub(crate) fn from_write(err: rusqlite::Error, capacity_bytes: u64) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DiskFull =>
            {
                StorageError::CapacityExhausted { capacity_bytes }
            }
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ReadOnly =>
            {
                StorageError::ReadOnly
            }
            _ => StorageError::Database(err),
        }
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::CapacityExhausted {
            capacity_bytes: 4096,
        };
        assert_eq!(
            err.to_string(),
            "Node store capacity exhausted (4096 bytes provisioned)"
        );

        let err = StorageError::ReadOnly;
        assert_eq!(err.to_string(), "Node store is open read-only");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
    }

    #[test]
    fn test_disk_full_maps_to_capacity() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            None,
        );
        assert!(matches!(
            StorageError::from_write(err, 1024),
            StorageError::CapacityExhausted {
                capacity_bytes: 1024
            }
        ));
    }
}
