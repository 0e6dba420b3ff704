//! JSON Trace Import
//!
//! Reads a top-level array of interval records:
//!
//! ```text
//! [
//!   {"Location": "t0", "Primitive": "A", "intervalId": "i1",
//!    "enter": {"Timestamp": 0}, "leave": {"Timestamp": 10}},
//!   ...
//! ]
//! ```
//!
//! Unknown fields are ignored. Each array element is decoded on its own so
//! one malformed record does not lose the rest of the trace.

use super::{ImportResult, ImportStats};
use crate::index::IndexWriter;
use serde::Deserialize;
use std::io::{BufReader, Read};
use std::path::Path;

/// One enter/leave pair on a track
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TraceRecord {
    #[serde(rename = "Location")]
    pub location: String,

    #[serde(rename = "Primitive")]
    pub primitive: String,

    #[serde(rename = "intervalId")]
    pub interval_id: String,

    pub enter: TraceEvent,
    pub leave: TraceEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TraceEvent {
    #[serde(rename = "Timestamp")]
    pub timestamp: f64,
}

/// JSON trace importer
#[derive(Debug, Default)]
pub struct JsonTraceImporter;

impl JsonTraceImporter {
    pub fn new() -> Self {
        Self
    }

    /// Import records from a JSON trace file
    pub fn import(&self, path: &Path, writer: &mut IndexWriter) -> ImportResult<ImportStats> {
        let file = std::fs::File::open(path)?;
        self.import_reader(BufReader::new(file), writer)
    }

    pub fn import_str(&self, data: &str, writer: &mut IndexWriter) -> ImportResult<ImportStats> {
        self.import_reader(data.as_bytes(), writer)
    }

    fn import_reader<R: Read>(&self, source: R, writer: &mut IndexWriter) -> ImportResult<ImportStats> {
        let values: Vec<serde_json::Value> = serde_json::from_reader(source)?;
        let mut stats = ImportStats::default();

        for (position, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<TraceRecord>(value) {
                Ok(record) => {
                    let accepted = writer.insert(
                        &record.location,
                        record.enter.timestamp,
                        record.leave.timestamp,
                        &record.primitive,
                        &record.interval_id,
                    );
                    stats.record_insert(position, accepted);
                }
                Err(e) => stats.record_failure(position, e),
            }
        }

        if stats.failed > 0 {
            tracing::warn!(failed = stats.failed, "Skipped malformed trace records");
        }
        Ok(stats)
    }
}
