//! Index Writer - ingestion and build orchestration
//!
//! ```text
//! insert(track, start, end, primitive, id)
//!     → StringInterner (tracks) + AttributeDictionary
//!     → TrackEvents per track
//!
//! build()
//!     1. (2D) reorder tracks naturally so neighbours are co-located
//!     2. one write transaction per track (or one for the global root)
//!        purge the previous build's subtree, construct, commit
//!     3. attributes.dict, tracks.dict, roots.manifest
//! ```
//!
//! Partitioned builds give each task a contiguous slice of the tracks. Tasks
//! may run as separate processes against the same dataset: each writes its
//! own root fragment instead of the root manifest, and write transactions
//! queue on the store's write lock.

use crate::config::{Config, IndexConfig, IndexMode, StorageConfig};
use crate::index::builder::{BuildStats, HierarchyBuilder};
use crate::index::events::{EventInterval, TrackEvents};
use crate::index::interner::{natural_order, AttributeDictionary, StringInterner};
use crate::storage::manifest::{self, DatasetPaths, RootManifest};
use crate::storage::{
    NodeId, NodeSource, NodeStore, StorageError, StorageResult, WriteTxn, ATTR_ID, ATTR_PRIMITIVE,
};
use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;

/// Outcome of a build
#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub mode: IndexMode,
    pub dataset_dir: PathBuf,
    /// Tracks this task built
    pub tracks: Range<usize>,
    pub intervals: u64,
    pub nodes_written: u64,
    pub nodes_purged: u64,
    pub collapsed: u64,
}

/// Single-writer ingestion front end
pub struct IndexWriter {
    storage: StorageConfig,
    index: IndexConfig,
    tracks: StringInterner,
    attributes: AttributeDictionary,
    events: Vec<TrackEvents>,
    inserted: u64,
    skipped: u64,
}

impl IndexWriter {
    pub fn new(config: &Config) -> Self {
        Self {
            storage: config.storage.clone(),
            index: config.index.clone(),
            tracks: StringInterner::new(),
            attributes: AttributeDictionary::new(),
            events: Vec::new(),
            inserted: 0,
            skipped: 0,
        }
    }

    /// Queue one interval; returns `false` when the interval was rejected
    pub fn insert(
        &mut self,
        track: &str,
        start: f64,
        end: f64,
        primitive: &str,
        interval_id: &str,
    ) -> bool {
        if !start.is_finite() || !end.is_finite() {
            tracing::warn!(track, interval_id, start, end, "Skipping interval with non-finite time");
            self.skipped += 1;
            return false;
        }
        if start > end {
            tracing::warn!(track, interval_id, start, end, "Skipping inverted interval");
            self.skipped += 1;
            return false;
        }
        if [track, primitive, interval_id]
            .iter()
            .any(|s| s.contains('\n') || s.contains('\r'))
        {
            tracing::warn!(track, interval_id, "Skipping interval with a line break in a name");
            self.skipped += 1;
            return false;
        }

        let track_index = self.tracks.insert(track) as usize;
        if track_index == self.events.len() {
            self.events.push(TrackEvents::new());
        }

        let interval = EventInterval {
            start,
            end,
            primitive: self.attributes.intern(ATTR_PRIMITIVE, primitive),
            id: self.attributes.intern(ATTR_ID, interval_id),
        };
        self.events[track_index].push(interval);
        self.inserted += 1;
        true
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn interval_count(&self) -> u64 {
        self.inserted
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped
    }

    /// Build and persist the hierarchy plus manifests, consuming the writer
    pub fn build(mut self) -> StorageResult<BuildSummary> {
        let paths = DatasetPaths::new(self.storage.dataset_dir());
        std::fs::create_dir_all(paths.dir())?;

        let mode = self.index.mode;
        if mode == IndexMode::TwoDimensional && self.index.task_count > 1 {
            return Err(StorageError::Config(
                "two-dimensional builds cannot be partitioned across tasks".to_string(),
            ));
        }

        if mode == IndexMode::TwoDimensional {
            self.colocate_tracks();
        }
        for events in &mut self.events {
            events.seal();
        }

        let range = partition(
            self.tracks.len(),
            self.index.task_count,
            self.index.task_id,
        );
        tracing::info!(
            dataset = %paths.dir().display(),
            %mode,
            rule = %self.index.splitting_rule,
            tracks = ?range,
            intervals = self.inserted,
            "Building index"
        );

        let previous = PreviousBuild::load(&paths);
        let mut store = NodeStore::open(&paths.node_store(), self.storage.capacity_bytes)?
            .with_busy_timeout(Duration::from_millis(self.storage.busy_timeout_ms))?;
        let mut stats = BuildStats::default();
        let mut purged = 0;

        let roots = match mode {
            IndexMode::PerTrack => {
                // Tracks gone from this build belong to no task; the first one drops them
                if self.index.task_id == 0 {
                    let txn = store.write_txn()?;
                    purged += previous.purge_dropped(&txn, &self.tracks)?;
                    txn.commit()?;
                }

                let mut roots = RootManifest::new(mode, self.tracks.len());
                for index in range.clone() {
                    let name = self.tracks.get(index as u32).unwrap_or_default().to_string();
                    let txn = store.write_txn()?;
                    purged += previous.purge_track(&txn, &name)?;

                    let mut builder = HierarchyBuilder::new(&txn, self.index.splitting_rule);
                    let root = builder.build_track(index as u32, &self.events[index])?;
                    accumulate(&mut stats, builder.stats());
                    txn.commit()?;

                    tracing::debug!(
                        track = %name,
                        intervals = self.events[index].len(),
                        "Built track hierarchy"
                    );
                    roots.set(index, root.map(|r| r.id));
                }
                roots
            }
            IndexMode::TwoDimensional => {
                let txn = store.write_txn()?;
                purged += previous.purge_all(&txn)?;

                let mut builder = HierarchyBuilder::new(&txn, self.index.splitting_rule);
                let root = builder.build_two_dimensional(&self.events)?;
                accumulate(&mut stats, builder.stats());
                txn.commit()?;

                let mut roots = RootManifest::new(mode, 1);
                roots.set(0, root.map(|r| r.id));
                roots
            }
        };

        manifest::write_attributes(&paths.attributes(), &self.attributes.to_manifest())?;
        manifest::write_tracks(&paths.tracks(), self.tracks.values())?;
        self.write_roots(&paths, &roots)?;

        tracing::info!(
            nodes = stats.nodes_written,
            purged,
            collapsed = stats.collapsed,
            skipped = self.skipped,
            "Index build complete"
        );

        Ok(BuildSummary {
            mode,
            dataset_dir: paths.dir().to_path_buf(),
            tracks: range,
            intervals: self.inserted,
            nodes_written: stats.nodes_written,
            nodes_purged: purged,
            collapsed: stats.collapsed,
        })
    }

    /// Root manifest for a whole build, or this task's fragment
    fn write_roots(&self, paths: &DatasetPaths, roots: &RootManifest) -> StorageResult<()> {
        let (task_id, task_count) = (self.index.task_id, self.index.task_count);

        if task_count <= 1 {
            roots.write(&paths.roots())?;
            for fragment in paths.root_fragments()? {
                remove_stale(&fragment.path)?;
            }
            return Ok(());
        }

        roots.write(&paths.root_fragment(task_id, task_count))?;
        for fragment in paths.root_fragments()? {
            if fragment.task_count != task_count {
                remove_stale(&fragment.path)?;
            }
        }
        tracing::info!(task_id, task_count, "Wrote root fragment");
        Ok(())
    }

    /// Sort tracks naturally and move their event lists along
    fn colocate_tracks(&mut self) {
        let old_to_new = self.tracks.reorder(natural_order);
        let mut slots: Vec<Option<TrackEvents>> = Vec::new();
        slots.resize_with(self.events.len(), || None);
        for (old, events) in self.events.drain(..).enumerate() {
            slots[old_to_new[old] as usize] = Some(events);
        }
        self.events = slots.into_iter().map(Option::unwrap_or_default).collect();
    }
}

fn accumulate(total: &mut BuildStats, part: BuildStats) {
    total.nodes_written += part.nodes_written;
    total.leaves += part.leaves;
    total.collapsed += part.collapsed;
}

/// A peer task may have removed the file already
fn remove_stale(path: &std::path::Path) -> StorageResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Removed stale root fragment");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Contiguous slice of `track_count` tracks owned by `task_id`
pub fn partition(track_count: usize, task_count: usize, task_id: usize) -> Range<usize> {
    let task_count = task_count.max(1);
    let chunk = track_count.div_ceil(task_count);
    let start = (task_id * chunk).min(track_count);
    let end = (start + chunk).min(track_count);
    start..end
}

/// Roots left behind by earlier builds of the same dataset
///
/// Gathered from the root manifest and every root fragment, since any of
/// them may still point at live nodes.
#[derive(Default)]
struct PreviousBuild {
    /// Roots of two-dimensional builds
    global: Vec<NodeId>,
    by_track: HashMap<String, Vec<NodeId>>,
    all: Vec<NodeId>,
}

impl PreviousBuild {
    fn load(paths: &DatasetPaths) -> Self {
        let mut sources = Vec::new();
        if paths.roots().exists() {
            sources.push(paths.roots());
        }
        match paths.root_fragments() {
            Ok(fragments) => sources.extend(fragments.into_iter().map(|f| f.path)),
            Err(e) => tracing::warn!("Cannot list previous root fragments: {}", e),
        }
        if sources.is_empty() {
            return Self::default();
        }

        let names = manifest::read_tracks(&paths.tracks()).unwrap_or_default();
        let mut previous = Self::default();
        for source in sources {
            let roots = match RootManifest::read(&source) {
                Ok(roots) => roots,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable previous roots: {}", e);
                    continue;
                }
            };
            for (index, root) in roots.roots.iter().enumerate() {
                let Some(root) = root else {
                    continue;
                };
                previous.all.push(*root);
                match roots.mode {
                    IndexMode::TwoDimensional => previous.global.push(*root),
                    IndexMode::PerTrack => {
                        if let Some(name) = names.get(index) {
                            previous.by_track.entry(name.clone()).or_default().push(*root);
                        }
                    }
                }
            }
        }
        previous
    }

    /// Remove the old hierarchy of one track, and any old global hierarchy
    ///
    /// Roots of peer tasks' fragments are never touched here, so partitioned
    /// tasks can purge while their peers are committing.
    fn purge_track(&self, txn: &WriteTxn<'_>, track: &str) -> StorageResult<u64> {
        let mut purged = 0;
        for root in self.global.iter().chain(self.by_track.get(track).into_iter().flatten()) {
            purged += purge_subtree(txn, *root)?;
        }
        Ok(purged)
    }

    /// Remove the hierarchies of tracks the new build no longer has
    fn purge_dropped(&self, txn: &WriteTxn<'_>, tracks: &StringInterner) -> StorageResult<u64> {
        let mut purged = 0;
        for (name, roots) in &self.by_track {
            if tracks.index_of(name).is_some() {
                continue;
            }
            for root in roots {
                purged += purge_subtree(txn, *root)?;
            }
            tracing::debug!(track = %name, "Purged hierarchy of dropped track");
        }
        Ok(purged)
    }

    fn purge_all(&self, txn: &WriteTxn<'_>) -> StorageResult<u64> {
        let mut purged = 0;
        for root in &self.all {
            purged += purge_subtree(txn, *root)?;
        }
        Ok(purged)
    }
}

/// Delete every node reachable from `root`
pub fn purge_subtree(txn: &WriteTxn<'_>, root: NodeId) -> StorageResult<u64> {
    let mut purged = 0;
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let Some(node) = txn.load(id)? else {
            continue;
        };
        stack.extend(node.left);
        stack.extend(node.right);
        if txn.delete(id)? {
            purged += 1;
        }
    }
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.to_string_lossy().to_string();
        config.storage.dataset = "trace".to_string();
        config.storage.capacity_bytes = 64 * 1024 * 1024;
        config
    }

    #[test]
    fn test_insert_rejects_malformed() {
        let dir = tempdir().unwrap();
        let mut writer = IndexWriter::new(&config_in(dir.path()));

        assert!(writer.insert("T", 0.0, 10.0, "A", "i1"));
        assert!(!writer.insert("T", 10.0, 0.0, "A", "i2"));
        assert!(!writer.insert("T", f64::NAN, 1.0, "A", "i3"));
        assert!(!writer.insert("T", 0.0, 1.0, "A\nB", "i4"));

        assert_eq!(writer.interval_count(), 1);
        assert_eq!(writer.skipped_count(), 3);
        assert_eq!(writer.track_count(), 1);
    }

    #[test]
    fn test_partition_is_contiguous_and_complete() {
        assert_eq!(partition(10, 3, 0), 0..4);
        assert_eq!(partition(10, 3, 1), 4..8);
        assert_eq!(partition(10, 3, 2), 8..10);
        assert_eq!(partition(2, 4, 3), 2..2);
        assert_eq!(partition(5, 1, 0), 0..5);
    }

    #[test]
    fn test_build_writes_manifests() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let mut writer = IndexWriter::new(&config);
        writer.insert("T", 0.0, 10.0, "A", "i1");
        writer.insert("T", 20.0, 30.0, "B", "i2");
        writer.insert("U", 5.0, 6.0, "A", "i3");

        let summary = writer.build().unwrap();
        assert_eq!(summary.tracks, 0..2);
        assert_eq!(summary.nodes_written, 4);

        let paths = DatasetPaths::new(config.storage.dataset_dir());
        assert_eq!(manifest::read_tracks(&paths.tracks()).unwrap(), vec!["T", "U"]);
        let roots = RootManifest::read(&paths.roots()).unwrap();
        assert_eq!(roots.mode, IndexMode::PerTrack);
        assert!(roots.root(0).is_some() && roots.root(1).is_some());

        let attributes = manifest::read_attributes(&paths.attributes()).unwrap();
        assert_eq!(attributes[ATTR_PRIMITIVE], vec!["A", "B"]);
        assert_eq!(attributes[ATTR_ID], vec!["i1", "i2", "i3"]);
    }

    #[test]
    fn test_rebuild_purges_previous_nodes() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());

        for _ in 0..2 {
            let mut writer = IndexWriter::new(&config);
            writer.insert("T", 0.0, 10.0, "A", "i1");
            writer.insert("T", 20.0, 30.0, "B", "i2");
            writer.build().unwrap();
        }

        let paths = DatasetPaths::new(config.storage.dataset_dir());
        let store = NodeStore::open(&paths.node_store(), config.storage.capacity_bytes).unwrap();
        assert_eq!(store.len().unwrap(), 3);
    }

    #[test]
    fn test_partitioned_builds_merge_roots() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.index.task_count = 2;

        for task_id in 0..2 {
            config.index.task_id = task_id;
            let mut writer = IndexWriter::new(&config);
            for track in ["a", "b", "c"] {
                writer.insert(track, 0.0, 1.0, "P", &format!("{track}-1"));
            }
            let summary = writer.build().unwrap();
            assert_eq!(summary.tracks, partition(3, 2, task_id));
        }

        let paths = DatasetPaths::new(config.storage.dataset_dir());
        assert!(!paths.roots().exists());
        let roots = manifest::load_roots(&paths).unwrap();
        assert_eq!(roots.len(), 3);
        assert!(roots.roots.iter().all(Option::is_some));

        // A whole build afterwards replaces the fragments and their nodes
        config.index.task_count = 1;
        config.index.task_id = 0;
        let mut writer = IndexWriter::new(&config);
        for track in ["a", "b", "c"] {
            writer.insert(track, 0.0, 1.0, "P", &format!("{track}-1"));
        }
        writer.build().unwrap();
        assert!(paths.root_fragments().unwrap().is_empty());
        let store = NodeStore::open(&paths.node_store(), config.storage.capacity_bytes).unwrap();
        assert_eq!(store.len().unwrap(), 3);
    }

    #[test]
    fn test_rebuild_purges_dropped_tracks() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());

        for track in ["x", "y", "z"] {
            let mut writer = IndexWriter::new(&config);
            writer.insert(track, 0.0, 10.0, "A", "i1");
            writer.insert(track, 20.0, 30.0, "B", "i2");
            writer.build().unwrap();
        }

        let paths = DatasetPaths::new(config.storage.dataset_dir());
        let store = NodeStore::open(&paths.node_store(), config.storage.capacity_bytes).unwrap();
        assert_eq!(store.len().unwrap(), 3);
    }

    #[test]
    fn test_two_dimensional_build_orders_tracks() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.index.mode = IndexMode::TwoDimensional;

        let mut writer = IndexWriter::new(&config);
        writer.insert("10", 0.0, 5.0, "A", "x");
        writer.insert("2", 3.0, 8.0, "A", "y");
        writer.insert("1", 1.0, 2.0, "B", "z");
        writer.build().unwrap();

        let paths = DatasetPaths::new(config.storage.dataset_dir());
        assert_eq!(manifest::read_tracks(&paths.tracks()).unwrap(), vec!["1", "2", "10"]);
        let roots = RootManifest::read(&paths.roots()).unwrap();
        assert_eq!(roots.mode, IndexMode::TwoDimensional);
        assert_eq!(roots.len(), 1);

        let store = NodeStore::open(&paths.node_store(), config.storage.capacity_bytes).unwrap();
        let read = store.read_txn().unwrap();
        let root = read.get(roots.root(0).unwrap()).unwrap().unwrap();
        assert_eq!(root.tracks.start, 0);
        assert_eq!(root.tracks.end, 2);
    }

    #[test]
    fn test_two_dimensional_rejects_partitioning() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.index.mode = IndexMode::TwoDimensional;
        config.index.task_count = 2;

        let mut writer = IndexWriter::new(&config);
        writer.insert("T", 0.0, 1.0, "A", "i");
        assert!(matches!(writer.build(), Err(StorageError::Config(_))));
    }
}
