//! CSV Import
//!
//! Interval rows in `track,start,end,primitive,id` column order.

use super::{ImportResult, ImportStats};
use crate::index::IndexWriter;
use std::io::Read;
use std::path::Path;

/// CSV interval importer
pub struct CsvIntervalImporter {
    has_header: bool,
    delimiter: u8,
}

impl Default for CsvIntervalImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvIntervalImporter {
    pub fn new() -> Self {
        Self {
            has_header: true,
            delimiter: b',',
        }
    }

    /// Set whether the CSV has a header row
    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Import intervals from a CSV file
    pub fn import(&self, path: &Path, writer: &mut IndexWriter) -> ImportResult<ImportStats> {
        let file = std::fs::File::open(path)?;
        self.import_reader(file, writer)
    }

    /// Import from a CSV string (useful for testing)
    pub fn import_str(&self, data: &str, writer: &mut IndexWriter) -> ImportResult<ImportStats> {
        self.import_reader(data.as_bytes(), writer)
    }

    fn import_reader<R: Read>(&self, source: R, writer: &mut IndexWriter) -> ImportResult<ImportStats> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(self.has_header)
            .delimiter(self.delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(source);

        let mut stats = ImportStats::default();
        let first_line = if self.has_header { 2 } else { 1 };

        for (row, result) in reader.records().enumerate() {
            let line = row + first_line;
            let record = match result {
                Ok(r) => r,
                Err(e) => {
                    stats.record_failure(line, e);
                    continue;
                }
            };

            let (track, start, end, primitive, id) = match (
                record.get(0),
                record.get(1),
                record.get(2),
                record.get(3),
                record.get(4),
            ) {
                (Some(track), Some(start), Some(end), Some(primitive), Some(id)) => {
                    (track, start, end, primitive, id)
                }
                _ => {
                    stats.record_failure(line, "expected 5 columns");
                    continue;
                }
            };

            let (start, end) = match (start.parse::<f64>(), end.parse::<f64>()) {
                (Ok(start), Ok(end)) => (start, end),
                _ => {
                    stats.record_failure(line, format!("invalid timestamps '{}', '{}'", start, end));
                    continue;
                }
            };

            let accepted = writer.insert(track, start, end, primitive, id);
            stats.record_insert(line, accepted);
        }

        if stats.failed > 0 {
            tracing::warn!(failed = stats.failed, "Skipped malformed CSV rows");
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_import_rows() {
        let mut writer = IndexWriter::new(&Config::default());
        let data = "track,start,end,primitive,id\n\
                    t0, 0, 10, A, i1\n\
                    t0,20,30,B,i2\n\
                    t1,5,6,A,i3\n";

        let stats = CsvIntervalImporter::new().import_str(data, &mut writer).unwrap();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(writer.track_count(), 2);
    }

    #[test]
    fn test_malformed_rows_are_counted() {
        let mut writer = IndexWriter::new(&Config::default());
        let data = "t0,0,10,A,i1\n\
                    t0,abc,10,A,i2\n\
                    t0,0,10\n\
                    t0,10,5,A,i3\n";

        let stats = CsvIntervalImporter::new()
            .with_header(false)
            .import_str(data, &mut writer)
            .unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.errors.len(), 3);
        assert!(stats.errors[0].starts_with("Record 2"));
    }

    #[test]
    fn test_custom_delimiter() {
        let mut writer = IndexWriter::new(&Config::default());
        let stats = CsvIntervalImporter::new()
            .with_header(false)
            .with_delimiter(b';')
            .import_str("t0;0;10;A;i1\n", &mut writer)
            .unwrap();
        assert_eq!(stats.processed, 1);
    }
}
