//! Trace Import
//!
//! Bulk loaders feeding intervals into an [`IndexWriter`]:
//! - JSON trace records (`Location`, `Primitive`, `intervalId`, enter/leave timestamps)
//! - CSV rows (`track,start,end,primitive,id`)
//!
//! A malformed record is counted and skipped; only an unreadable source fails
//! the whole import.

mod csv_import;
mod json_trace;

pub use csv_import::CsvIntervalImporter;
pub use json_trace::{JsonTraceImporter, TraceRecord};

use crate::index::IndexWriter;
use std::path::Path;

/// Outcome of an import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Records accepted by the writer
    pub processed: u64,
    /// Records that failed to parse or were rejected
    pub failed: u64,
    /// First few failure messages, with their record position
    pub errors: Vec<String>,
}

const MAX_REPORTED_ERRORS: usize = 100;

impl ImportStats {
    fn record_failure(&mut self, position: usize, message: impl std::fmt::Display) {
        self.failed += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(format!("Record {}: {}", position, message));
        }
    }

    fn record_insert(&mut self, position: usize, accepted: bool) {
        if accepted {
            self.processed += 1;
        } else {
            self.record_failure(position, "rejected by writer");
        }
    }
}

/// Errors that abort an import
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported trace format: {0}")]
    UnsupportedFormat(String),
}

pub type ImportResult<T> = Result<T, ImportError>;

/// Pick an importer from the file extension
pub fn import_file(path: &Path, writer: &mut IndexWriter) -> ImportResult<ImportStats> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let stats = match extension.as_deref() {
        Some("json") => JsonTraceImporter::new().import(path, writer)?,
        Some("csv") => CsvIntervalImporter::new().import(path, writer)?,
        _ => return Err(ImportError::UnsupportedFormat(path.display().to_string())),
    };

    tracing::info!(
        path = %path.display(),
        processed = stats.processed,
        failed = stats.failed,
        "Imported trace"
    );
    Ok(stats)
}
