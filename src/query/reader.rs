//! Index Reader - query serving over a built dataset
//!
//! ```text
//! open():   tracks.dict + attributes.dict + roots (manifest or fragments) → ReaderPool
//!
//! range_query(begin, end, bins, tracks, filters)
//!     ├─ resolve filters to interned indices
//!     ├─ per-track: lock TrackCache → prepare → traverse → evict
//!     │  2D:        transient subtree from the global root
//!     └─ BinAccumulator per track → values in [0, 1]
//! ```
//!
//! Node loads that fail are logged and treated as absent, so a damaged store
//! yields partial coverage rather than an error.

use crate::config::{Config, IndexMode, QueryConfig};
use crate::index::{AttributeDictionary, StringInterner};
use crate::query::bins::{bin_width, BinAccumulator};
use crate::query::cache::{CacheDecision, Materializer, TrackCache};
use crate::query::error::{QueryError, QueryResult};
use crate::query::filter::AttributeFilter;
use crate::query::traversal::{join_pieces, Hit, QueryStats, Traversal};
use crate::query::BinnedIndex;
use crate::storage::manifest::{self, DatasetPaths, RootManifest};
use crate::storage::{NodeId, NodeSource, ReaderPool, StorageError, StorageResult, ATTR_ID};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Which tracks a query covers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TrackSelection {
    #[default]
    All,
    /// Named tracks; unknown names are omitted from the result
    Names(Vec<String>),
    /// Inclusive range of track indices
    Range { first: u32, last: u32 },
}

/// Binned coverage query
#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub time_begin: f64,
    pub time_end: f64,
    pub bins: usize,
    pub tracks: TrackSelection,
    /// Overrides the configured resolution divisor
    pub resolution: Option<f64>,
    pub filters: BTreeMap<String, String>,
}

impl RangeQuery {
    pub fn new(time_begin: f64, time_end: f64, bins: usize) -> Self {
        Self {
            time_begin,
            time_end,
            bins,
            tracks: TrackSelection::All,
            resolution: None,
            filters: BTreeMap::new(),
        }
    }

    pub fn with_tracks<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracks = TrackSelection::Names(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_track_range(mut self, first: u32, last: u32) -> Self {
        self.tracks = TrackSelection::Range { first, last };
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = Some(resolution);
        self
    }
}

/// Read-only serving object over one dataset
///
/// Safe to share between threads; each track's hot cache sits behind its own
/// lock and each query reads through a pooled connection.
pub struct IndexReader {
    paths: DatasetPaths,
    mode: IndexMode,
    settings: QueryConfig,
    tracks: StringInterner,
    attributes: AttributeDictionary,
    roots: RootManifest,
    pool: ReaderPool,
    caches: Vec<Mutex<TrackCache>>,
}

impl IndexReader {
    /// Load the manifests and open the node store read-only
    pub fn open(config: &Config) -> StorageResult<Self> {
        let paths = DatasetPaths::new(config.storage.dataset_dir());

        let tracks = StringInterner::from_values(manifest::read_tracks(&paths.tracks())?);
        let attributes =
            AttributeDictionary::from_manifest(manifest::read_attributes(&paths.attributes())?);
        let roots = manifest::load_roots(&paths)?;

        let mode = roots.mode;
        if mode != config.index.mode {
            tracing::warn!(
                configured = %config.index.mode,
                built = %mode,
                "Serving dataset in the mode it was built with"
            );
        }

        let expected_roots = match mode {
            IndexMode::PerTrack => tracks.len(),
            IndexMode::TwoDimensional => 1,
        };
        if roots.len() != expected_roots {
            return Err(StorageError::manifest(
                paths.roots(),
                format!(
                    "expected {} roots for {} tracks, found {}",
                    expected_roots,
                    tracks.len(),
                    roots.len()
                ),
            ));
        }

        let pool = ReaderPool::open(&paths.node_store(), config.storage.capacity_bytes)?;

        let caches = match mode {
            IndexMode::PerTrack => (0..tracks.len())
                .map(|i| Mutex::new(TrackCache::new(roots.root(i))))
                .collect(),
            IndexMode::TwoDimensional => Vec::new(),
        };

        tracing::info!(
            dataset = %paths.dir().display(),
            %mode,
            tracks = tracks.len(),
            "Opened index"
        );

        Ok(Self {
            paths,
            mode,
            settings: config.query.clone(),
            tracks,
            attributes,
            roots,
            pool,
            caches,
        })
    }

    /// Release the node store and every cached subtree
    pub fn close(self) {
        tracing::info!(dataset = %self.paths.dir().display(), "Closing index");
    }

    pub fn mode(&self) -> IndexMode {
        self.mode
    }

    pub fn track_names(&self) -> &[String] {
        self.tracks.values()
    }

    pub fn attributes(&self) -> &AttributeDictionary {
        &self.attributes
    }

    /// Root of the hot subtree currently cached for `track`
    pub fn cached_root(&self, track: &str) -> Option<NodeId> {
        let index = self.tracks.index_of(track)?;
        let cache = self.caches.get(index as usize)?;
        lock(cache).cached_root()
    }

    /// Drop all hot subtrees; the next queries start cold
    pub fn clear_cache(&self) {
        for cache in &self.caches {
            lock(cache).clear();
        }
    }

    /// Per-track coverage vectors for a binned window
    pub fn range_query(&self, query: &RangeQuery) -> QueryResult<BTreeMap<String, Vec<f64>>> {
        self.range_query_with_stats(query).map(|(result, _)| result)
    }

    pub fn range_query_with_stats(
        &self,
        query: &RangeQuery,
    ) -> QueryResult<(BTreeMap<String, Vec<f64>>, QueryStats)> {
        let resolution = query.resolution.unwrap_or(self.settings.resolution_divisor);
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(QueryError::InvalidResolution(resolution));
        }
        let selected = self.select_tracks(&query.tracks)?;

        let (begin, end, bins) = (query.time_begin, query.time_end, query.bins);
        let mut accumulators: BTreeMap<u32, BinAccumulator> = selected
            .iter()
            .map(|&i| (i, BinAccumulator::new(begin, end, bins)))
            .collect();
        let mut stats = QueryStats::default();

        let degenerate = begin >= end || begin.is_nan() || end.is_nan() || bins == 0;
        let filter =
            AttributeFilter::resolve(&query.filters, &self.attributes, self.settings.unresolved_filter);

        if !degenerate && !filter.matches_nothing() && !selected.is_empty() {
            let scaled_bin = bin_width(begin, end, bins) * resolution;
            let traversal = Traversal::coverage(begin, end, scaled_bin, &filter);
            let hits = self.collect(&selected, &traversal, &mut stats);

            for hit in join_pieces(hits) {
                if let Hit::Segment {
                    track, start, end, ..
                } = hit
                {
                    if let Some(acc) = accumulators.get_mut(&track) {
                        acc.add(start, end);
                    }
                }
            }
        }

        tracing::debug!(
            begin,
            end,
            bins,
            tracks = selected.len(),
            visited = stats.nodes_visited,
            loaded = stats.nodes_loaded,
            depth = stats.max_depth,
            "Range query"
        );

        let result = accumulators
            .into_iter()
            .filter_map(|(index, acc)| {
                self.tracks
                    .get(index)
                    .map(|name| (name.to_string(), acc.finish()))
            })
            .collect();
        Ok((result, stats))
    }

    /// Identifier of an interval on `track` covering `time`
    ///
    /// Descends to the leaves; `None` when no interval contains `time`.
    pub fn nearest_event(&self, time: f64, track: &str) -> Option<String> {
        if !time.is_finite() {
            return None;
        }
        let index = self.tracks.index_of(track)?;

        let filter = AttributeFilter::none();
        let scaled_bin = bin_width(time, time + 1.0, 1) * self.settings.resolution_divisor;
        let traversal = Traversal::coverage(time, time + 1.0, scaled_bin, &filter).with_lookup(ATTR_ID);

        let mut stats = QueryStats::default();
        let hits = self.collect(&[index], &traversal, &mut stats);

        hits.into_iter().find_map(|hit| match hit {
            Hit::Value { track, value } if track == index => {
                self.attributes.value(ATTR_ID, value).map(str::to_string)
            }
            _ => None,
        })
    }

    fn select_tracks(&self, selection: &TrackSelection) -> QueryResult<Vec<u32>> {
        match selection {
            TrackSelection::All => Ok((0..self.tracks.len() as u32).collect()),
            TrackSelection::Names(names) => Ok(names
                .iter()
                .filter_map(|name| {
                    let index = self.tracks.index_of(name);
                    if index.is_none() {
                        tracing::debug!(track = %name, "Unknown track omitted");
                    }
                    index
                })
                .collect()),
            TrackSelection::Range { first, last } => {
                if first > last || *last as usize >= self.tracks.len() {
                    return Err(QueryError::InvalidTrackRange {
                        first: *first,
                        last: *last,
                        track_count: self.tracks.len(),
                    });
                }
                Ok((*first..=*last).collect())
            }
        }
    }

    /// Run a traversal over the selected tracks
    fn collect(&self, tracks: &[u32], traversal: &Traversal<'_>, stats: &mut QueryStats) -> Vec<Hit> {
        let reader = match self.pool.acquire() {
            Ok(reader) => reader,
            Err(e) => {
                tracing::error!("Failed to acquire node store reader: {}", e);
                return Vec::new();
            }
        };
        let txn = match reader.read_txn() {
            Ok(txn) => txn,
            Err(e) => {
                tracing::error!("Failed to begin read transaction: {}", e);
                return Vec::new();
            }
        };

        match self.mode {
            IndexMode::PerTrack => tracks
                .iter()
                .flat_map(|&track| self.query_track(&txn, track, traversal, stats))
                .collect(),
            IndexMode::TwoDimensional => {
                let (Some(&first), Some(&last)) = (tracks.iter().min(), tracks.iter().max()) else {
                    return Vec::new();
                };
                self.query_global(&txn, traversal.with_tracks(first, last), stats)
            }
        }
    }

    fn query_track(
        &self,
        source: &dyn NodeSource,
        track: u32,
        traversal: &Traversal<'_>,
        stats: &mut QueryStats,
    ) -> Vec<Hit> {
        let Some(cache) = self.caches.get(track as usize) else {
            return Vec::new();
        };
        let mut cache = lock(cache);
        let mut materializer = Materializer::new(source);

        let decision = cache.prepare(
            &mut materializer,
            traversal.begin,
            traversal.end,
            traversal.scaled_bin,
            self.settings.locality_margin,
        );
        tracing::trace!(track, ?decision, "Prepared track cache");

        let hits = match (decision, cache.root_mut()) {
            (CacheDecision::Empty, _) | (_, None) => Vec::new(),
            (_, Some(root)) => traversal.run(root, &mut materializer, stats),
        };
        cache.evict(self.settings.retained_levels);
        stats.nodes_loaded += materializer.loaded();
        hits
    }

    fn query_global(
        &self,
        source: &dyn NodeSource,
        traversal: Traversal<'_>,
        stats: &mut QueryStats,
    ) -> Vec<Hit> {
        let Some(root) = self.roots.root(0) else {
            return Vec::new();
        };
        let mut materializer = Materializer::new(source);
        let hits = match materializer.load(root) {
            Some(mut tree) => traversal.run(&mut tree, &mut materializer, stats),
            None => Vec::new(),
        };
        stats.nodes_loaded += materializer.loaded();
        hits
    }
}

impl BinnedIndex for IndexReader {
    fn range_query(&self, query: &RangeQuery) -> QueryResult<BTreeMap<String, Vec<f64>>> {
        IndexReader::range_query(self, query)
    }

    fn nearest_event(&self, time: f64, track: &str) -> Option<String> {
        IndexReader::nearest_event(self, time, track)
    }
}

/// A poisoned cache is discarded and rebuilt cold
fn lock(cache: &Mutex<TrackCache>) -> MutexGuard<'_, TrackCache> {
    match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Track cache lock poisoned, resetting");
            let mut guard = poisoned.into_inner();
            guard.clear();
            guard
        }
    }
}
