//! Tracebin Query Engine
//!
//! Answers binned coverage queries over a built dataset:
//!
//! - **bins**: segment → bin coverage values
//! - **filter**: attribute equality predicates
//! - **cache**: per-track hot subtree with locality reuse
//! - **traversal**: resolution-limited hierarchy walk
//! - **reader**: the serving object
//!
//! # Examples
//!
//! ```rust,ignore
//! use tracebin::query::{IndexReader, RangeQuery};
//!
//! let reader = IndexReader::open(&config)?;
//!
//! // Three bins over [0, 30), tracks t0 and t1, only primitive A
//! let query = RangeQuery::new(0.0, 30.0, 3)
//!     .with_tracks(["t0", "t1"])
//!     .with_filter("primitive", "A");
//! let coverage = reader.range_query(&query)?;
//!
//! // Which interval is under the cursor?
//! let id = reader.nearest_event(25.0, "t0");
//! ```

mod bins;
mod cache;
mod error;
mod filter;
mod reader;
mod traversal;

use std::collections::BTreeMap;

pub use bins::{bin_width, BinAccumulator, FULL, PARTIAL};
pub use cache::{CacheDecision, CachedNode, Materializer, TrackCache};
pub use error::{QueryError, QueryResult};
pub use filter::{AttributeFilter, UnresolvedFilterPolicy};
pub use reader::{IndexReader, RangeQuery, TrackSelection};
pub use traversal::{Hit, QueryStats, Traversal};

/// Anything that can answer binned coverage queries
pub trait BinnedIndex: Send + Sync {
    /// Coverage in `[0, 1]` per bin for each selected track
    fn range_query(&self, query: &RangeQuery) -> QueryResult<BTreeMap<String, Vec<f64>>>;

    /// Identifier of an interval on `track` at `time`, if any
    fn nearest_event(&self, time: f64, track: &str) -> Option<String>;
}
