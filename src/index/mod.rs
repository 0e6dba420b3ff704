//! Tracebin Index Construction
//!
//! Turns ingested intervals into a persisted interval hierarchy:
//!
//! - **interner**: dense indices for tracks and attribute values
//! - **events**: per-track interval lists ordered by start
//! - **split**: FAIR / MIDPOINT / MAX-DISTANCE splitting rules
//! - **builder**: 1D and 2D hierarchy construction
//! - **writer**: ingestion, build orchestration and manifests
//!
//! # Architecture
//!
//! ```text
//! insert() ──► IndexWriter ──► TrackEvents ──► HierarchyBuilder ──► NodeStore
//!                   │                                                  │
//!                   └──────────── manifests ◄──────────── root ids ◄───┘
//! ```

pub mod builder;
pub mod events;
pub mod interner;
pub mod split;
pub mod writer;

pub use builder::{BuildStats, BuiltNode, HierarchyBuilder};
pub use events::{EventInterval, TrackEvents};
pub use interner::{natural_order, AttributeDictionary, StringInterner};
pub use split::SplittingRule;
pub use writer::{partition, BuildSummary, IndexWriter};
