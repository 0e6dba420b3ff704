//! Query error types
//!
//! Storage misses and failed node loads never surface here; they degrade to
//! empty results. These errors cover misuse of the serving object itself.

use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Track range outside the loaded track dictionary
    #[error("Invalid track range {first}..={last} ({track_count} tracks loaded)")]
    InvalidTrackRange {
        first: u32,
        last: u32,
        track_count: usize,
    },

    /// Resolution multiplier must be a positive finite number
    #[error("Invalid resolution multiplier: {0}")]
    InvalidResolution(f64),

    /// Opening the dataset for serving failed
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
