//! # Tracebin
//!
//! Hierarchical interval index for binned trace visualization.
//!
//! Intervals (a track, a start, an end, a primitive and an id) are built into
//! persisted interval hierarchies. A viewer then asks for coverage of any time
//! window at any bin count and gets back one value per bin, without touching
//! every interval.
//!
//! ## Features
//!
//! - **Persisted hierarchies**: per-track or time × track trees in a fixed-size SQLite store
//! - **Resolution-limited queries**: traversal stops once a node fits in a bin
//! - **Hot caching**: per-track subtrees reused across pans and zooms
//! - **Attribute filters**: prune whole subtrees by primitive or interval id
//!
//! ## Modules
//!
//! - [`storage`]: node records, node store and dataset manifests
//! - [`index`]: ingestion and hierarchy construction
//! - [`query`]: binned coverage queries and the hot cache
//! - [`import`]: JSON and CSV trace loaders
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tracebin::{Config, IndexReader, IndexWriter, RangeQuery};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!
//!     // Ingest and build
//!     let mut writer = IndexWriter::new(&config);
//!     writer.insert("t0", 0.0, 10.0, "A", "i1");
//!     writer.insert("t0", 20.0, 30.0, "B", "i2");
//!     writer.build()?;
//!
//!     // Serve
//!     let reader = IndexReader::open(&config)?;
//!     let coverage = reader.range_query(&RangeQuery::new(0.0, 30.0, 3))?;
//!     println!("{:?}", coverage["t0"]); // [1.0, 0.0, 1.0]
//!
//!     reader.close();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod import;
pub mod index;
pub mod query;
pub mod storage;

// Re-export top-level types for convenience
pub use config::{
    Config, ConfigError, IndexConfig, IndexMode, LoggingConfig, QueryConfig, StorageConfig,
};

pub use storage::{NodeId, NodeStore, StorageError, StorageResult};

pub use index::{BuildSummary, IndexWriter, SplittingRule};

pub use query::{
    BinnedIndex, IndexReader, QueryError, QueryResult, QueryStats, RangeQuery, TrackSelection,
    UnresolvedFilterPolicy,
};

pub use import::{CsvIntervalImporter, ImportError, ImportStats, JsonTraceImporter};
