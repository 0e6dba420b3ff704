//! Resolution-limited hierarchy traversal
//!
//! Walks a cached subtree with an explicit stack, loading children on demand.
//! A node is emitted instead of descended into once the scaled bin width
//! covers its whole span, so the work per query is bounded by the number of
//! bins rather than the number of intervals.

use crate::query::cache::{CachedNode, Materializer};
use crate::query::filter::AttributeFilter;
use crate::storage::ATTR_ID;
use std::collections::BTreeMap;

/// Counters collected while answering one query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub nodes_visited: u64,
    pub nodes_loaded: u64,
    pub max_depth: usize,
}

impl QueryStats {
    pub fn merge(&mut self, other: &QueryStats) {
        self.nodes_visited += other.nodes_visited;
        self.nodes_loaded += other.nodes_loaded;
        self.max_depth = self.max_depth.max(other.max_depth);
    }
}

/// Something emitted by the traversal
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Hit {
    /// Covered time on a track, clamped to the query window
    ///
    /// `interval` is set when the segment is a leaf holding one interval id.
    Segment {
        track: u32,
        start: f64,
        end: f64,
        interval: Option<u32>,
    },
    /// Representative attribute index of an emitted node
    Value { track: u32, value: u32 },
}

/// One traversal's parameters
#[derive(Debug, Clone, Copy)]
pub struct Traversal<'a> {
    pub begin: f64,
    pub end: f64,
    /// Bin width times the resolution divisor
    pub scaled_bin: f64,
    pub filter: &'a AttributeFilter,
    /// Emit the first value of this attribute key instead of segments
    ///
    /// Lookups are point queries at `begin`: only leaves whose time range
    /// contains it are emitted, whatever the bin width.
    pub lookup: Option<&'a str>,
    /// Inclusive track range, for hierarchies spanning several tracks
    pub tracks: Option<(u32, u32)>,
}

impl<'a> Traversal<'a> {
    pub fn coverage(begin: f64, end: f64, scaled_bin: f64, filter: &'a AttributeFilter) -> Self {
        Self {
            begin,
            end,
            scaled_bin,
            filter,
            lookup: None,
            tracks: None,
        }
    }

    pub fn with_lookup(mut self, key: &'a str) -> Self {
        self.lookup = Some(key);
        self
    }

    pub fn with_tracks(mut self, first: u32, last: u32) -> Self {
        self.tracks = Some((first, last));
        self
    }

    pub fn run(
        &self,
        root: &mut CachedNode,
        materializer: &mut Materializer<'_>,
        stats: &mut QueryStats,
    ) -> Vec<Hit> {
        let mut hits = Vec::new();
        let mut stack: Vec<(&mut CachedNode, usize)> = vec![(root, 0)];

        while let Some((current, depth)) = stack.pop() {
            stats.nodes_visited += 1;
            stats.max_depth = stats.max_depth.max(depth);

            let node = &current.node;
            if self.filter.is_active() && !self.filter.matches(&node.attributes) {
                continue;
            }
            let in_window = match self.lookup {
                None => node.time.intersects(self.begin, self.end),
                Some(_) => node.time.contains(self.begin, self.begin),
            };
            if !in_window {
                continue;
            }
            if let Some((first, last)) = self.tracks {
                if !node.tracks.overlaps(first, last) {
                    continue;
                }
            }

            let single_track = node.tracks.is_single();
            let resolved =
                self.lookup.is_none() && single_track && self.scaled_bin >= node.time.span();
            if node.is_leaf() || resolved {
                if single_track {
                    self.emit(node, &mut hits);
                }
                continue;
            }

            materializer.child(current);
            let CachedNode { left, right, .. } = current;
            match (left.as_deref_mut(), right.as_deref_mut()) {
                (Some(left), Some(right)) => {
                    // Earlier-starting child is popped first
                    if right.node.time.start < left.node.time.start {
                        stack.push((left, depth + 1));
                        stack.push((right, depth + 1));
                    } else {
                        stack.push((right, depth + 1));
                        stack.push((left, depth + 1));
                    }
                }
                (Some(child), None) | (None, Some(child)) => stack.push((child, depth + 1)),
                (None, None) => {}
            }
        }

        tracing::trace!(
            visited = stats.nodes_visited,
            hits = hits.len(),
            "Traversal finished"
        );
        hits
    }

    fn emit(&self, node: &crate::storage::Node, hits: &mut Vec<Hit>) {
        let track = node.tracks.start;
        match self.lookup {
            None => hits.push(Hit::Segment {
                track,
                start: node.time.start.max(self.begin),
                end: node.time.end.min(self.end),
                interval: single_interval(node),
            }),
            Some(key) => match node.attributes.first(key) {
                Some(value) => hits.push(Hit::Value { track, value }),
                None => tracing::debug!(node = %node.id, key = key, "Node lacks lookup attribute"),
            },
        }
    }
}

fn single_interval(node: &crate::storage::Node) -> Option<u32> {
    if !node.is_leaf() {
        return None;
    }
    match node.attributes.get(ATTR_ID) {
        Some(ids) if ids.len() == 1 => ids.iter().next().copied(),
        _ => None,
    }
}

/// Rejoin the pieces of one interval that time splits cut apart
///
/// Pieces of the same interval on the same track that touch end to start
/// become one segment again, so a bin they cover together scores as covered
/// by a single interval.
pub fn join_pieces(hits: Vec<Hit>) -> Vec<Hit> {
    let mut joined = Vec::with_capacity(hits.len());
    let mut pieces: BTreeMap<(u32, u32), Vec<(f64, f64)>> = BTreeMap::new();

    for hit in hits {
        match hit {
            Hit::Segment {
                track,
                start,
                end,
                interval: Some(id),
            } => pieces.entry((track, id)).or_default().push((start, end)),
            other => joined.push(other),
        }
    }

    for ((track, id), mut spans) in pieces {
        spans.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        let mut spans = spans.into_iter();
        let Some(mut current) = spans.next() else {
            continue;
        };
        let segment = |(start, end): (f64, f64)| Hit::Segment {
            track,
            start,
            end,
            interval: Some(id),
        };
        for (start, end) in spans {
            if start == current.1 {
                current.1 = end;
            } else {
                joined.push(segment(current));
                current = (start, end);
            }
        }
        joined.push(segment(current));
    }

    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{EventInterval, HierarchyBuilder, SplittingRule, TrackEvents};
    use crate::storage::{NodeId, NodeStore, ATTR_ID, ATTR_PRIMITIVE};
    use tempfile::tempdir;

    fn events(items: &[(f64, f64, u32, u32)]) -> TrackEvents {
        let mut events = TrackEvents::new();
        for &(start, end, primitive, id) in items {
            events.push(EventInterval {
                start,
                end,
                primitive,
                id,
            });
        }
        events.seal();
        events
    }

    fn store_with(track: &TrackEvents) -> (tempfile::TempDir, NodeStore, NodeId) {
        let dir = tempdir().unwrap();
        let mut store = NodeStore::open(&dir.path().join("nodes.db"), 1 << 26).unwrap();
        let txn = store.write_txn().unwrap();
        let root = HierarchyBuilder::new(&txn, SplittingRule::Fair)
            .build_track(0, track)
            .unwrap()
            .unwrap();
        txn.commit().unwrap();
        (dir, store, root.id)
    }

    fn run(store: &NodeStore, root: NodeId, traversal: &Traversal<'_>) -> (Vec<Hit>, QueryStats) {
        let read = store.read_txn().unwrap();
        let mut m = Materializer::new(&read);
        let mut tree = m.load(root).unwrap();
        let mut stats = QueryStats::default();
        let hits = traversal.run(&mut tree, &mut m, &mut stats);
        (hits, stats)
    }

    #[test]
    fn test_fine_bins_reach_leaves() {
        let track = events(&[(0.0, 10.0, 0, 0), (20.0, 30.0, 1, 1), (40.0, 50.0, 0, 2)]);
        let (_dir, store, root) = store_with(&track);
        let filter = AttributeFilter::none();

        let (hits, stats) = run(&store, root, &Traversal::coverage(0.0, 50.0, 1.0, &filter));
        assert_eq!(
            hits,
            vec![
                Hit::Segment { track: 0, start: 0.0, end: 10.0, interval: Some(0) },
                Hit::Segment { track: 0, start: 20.0, end: 30.0, interval: Some(1) },
                Hit::Segment { track: 0, start: 40.0, end: 50.0, interval: Some(2) },
            ]
        );
        assert!(stats.max_depth >= 1);
    }

    #[test]
    fn test_coarse_bins_stop_at_root() {
        let track = events(&[(0.0, 10.0, 0, 0), (20.0, 30.0, 1, 1), (40.0, 50.0, 0, 2)]);
        let (_dir, store, root) = store_with(&track);
        let filter = AttributeFilter::none();

        let (hits, stats) = run(&store, root, &Traversal::coverage(5.0, 45.0, 100.0, &filter));
        assert_eq!(
            hits,
            vec![Hit::Segment { track: 0, start: 5.0, end: 45.0, interval: None }]
        );
        assert_eq!(stats.nodes_visited, 1);
    }

    #[test]
    fn test_window_prunes_subtrees() {
        let track = events(&[(0.0, 10.0, 0, 0), (20.0, 30.0, 1, 1), (40.0, 50.0, 0, 2)]);
        let (_dir, store, root) = store_with(&track);
        let filter = AttributeFilter::none();

        let (hits, _) = run(&store, root, &Traversal::coverage(21.0, 29.0, 1.0, &filter));
        assert_eq!(
            hits,
            vec![Hit::Segment { track: 0, start: 21.0, end: 29.0, interval: Some(1) }]
        );
    }

    #[test]
    fn test_filter_prunes_nodes() {
        let track = events(&[(0.0, 10.0, 0, 0), (20.0, 30.0, 1, 1), (40.0, 50.0, 0, 2)]);
        let (_dir, store, root) = store_with(&track);

        let mut dict = crate::index::AttributeDictionary::new();
        dict.intern(ATTR_PRIMITIVE, "A");
        dict.intern(ATTR_PRIMITIVE, "B");
        let mut wanted = std::collections::BTreeMap::new();
        wanted.insert(ATTR_PRIMITIVE.to_string(), "B".to_string());
        let filter = AttributeFilter::resolve(
            &wanted,
            &dict,
            crate::query::UnresolvedFilterPolicy::Ignore,
        );

        let (hits, _) = run(&store, root, &Traversal::coverage(0.0, 50.0, 1.0, &filter));
        assert_eq!(
            hits,
            vec![Hit::Segment { track: 0, start: 20.0, end: 30.0, interval: Some(1) }]
        );
    }

    #[test]
    fn test_lookup_emits_attribute_values() {
        let track = events(&[(0.0, 10.0, 0, 4), (20.0, 30.0, 1, 7)]);
        let (_dir, store, root) = store_with(&track);
        let filter = AttributeFilter::none();

        let traversal = Traversal::coverage(22.0, 23.0, 1.0, &filter).with_lookup(ATTR_ID);
        let (hits, _) = run(&store, root, &traversal);
        assert_eq!(hits, vec![Hit::Value { track: 0, value: 7 }]);
    }

    #[test]
    fn test_lookup_needs_an_enclosing_leaf() {
        let track = events(&[(0.0, 0.4, 0, 1), (0.6, 1.0, 0, 2)]);
        let (_dir, store, root) = store_with(&track);
        let filter = AttributeFilter::none();

        // A bin wide enough to swallow the whole track still resolves to leaves
        let at = |t: f64| {
            let traversal = Traversal::coverage(t, t + 1.0, 100.0, &filter).with_lookup(ATTR_ID);
            run(&store, root, &traversal).0
        };
        assert!(at(0.5).is_empty());
        assert_eq!(at(0.7), vec![Hit::Value { track: 0, value: 2 }]);
        assert_eq!(at(0.4), vec![Hit::Value { track: 0, value: 1 }]);
        assert!(at(1.5).is_empty());
    }

    #[test]
    fn test_join_pieces() {
        let piece = |track, start, end, interval| Hit::Segment {
            track,
            start,
            end,
            interval,
        };
        let hits = vec![
            piece(0, 50.0, 95.0, Some(3)),
            piece(0, 20.0, 30.0, Some(4)),
            piece(0, 5.0, 50.0, Some(3)),
            piece(0, 30.0, 40.0, Some(5)),
            piece(1, 0.0, 60.0, None),
            piece(1, 60.0, 70.0, None),
        ];

        let mut joined = join_pieces(hits);
        joined.sort_by(|a, b| match (a, b) {
            (
                Hit::Segment { track: t1, start: s1, .. },
                Hit::Segment { track: t2, start: s2, .. },
            ) => t1.cmp(t2).then(s1.total_cmp(s2)),
            _ => std::cmp::Ordering::Equal,
        });
        assert_eq!(
            joined,
            vec![
                piece(0, 5.0, 95.0, Some(3)),
                piece(0, 20.0, 30.0, Some(4)),
                piece(0, 30.0, 40.0, Some(5)),
                piece(1, 0.0, 60.0, None),
                piece(1, 60.0, 70.0, None),
            ]
        );
    }
}
