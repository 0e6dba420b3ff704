//! Hierarchy construction
//!
//! Builds and persists the interval hierarchy inside one write transaction.
//!
//! ```text
//! 1D (per track):            2D (time × track):
//!
//!        [0, 30]                  tracks 0..=3, [0, 100)
//!        /     \                  /                   \
//!   [0, 10]   [20, 30]     [0, 50) by time       [50, 100) by time
//!    leaf       leaf          /      \               /      \
//!                        tracks 0..=1  2..=3     0..=1      2..=3
//! ```
//!
//! Every node is written before its parent; children hand their summaries
//! back up so nothing is re-read during aggregation.

use crate::index::events::{EventInterval, TrackEvents};
use crate::index::split::SplittingRule;
use crate::storage::{
    AttributeSets, Node, NodeId, StorageResult, TimeSpan, TrackSpan, WriteTxn, ATTR_ID,
    ATTR_PRIMITIVE,
};

/// What a parent needs to know about a persisted child
#[derive(Debug, Clone)]
pub struct BuiltNode {
    pub id: NodeId,
    pub time: TimeSpan,
    pub tracks: TrackSpan,
    pub attributes: AttributeSets,
}

impl BuiltNode {
    fn from_node(node: &Node) -> Self {
        Self {
            id: node.id,
            time: node.time,
            tracks: node.tracks,
            attributes: node.attributes.clone(),
        }
    }
}

/// Construction counters
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildStats {
    pub nodes_written: u64,
    pub leaves: u64,
    /// Ranges the splitting rule could not separate
    pub collapsed: u64,
}

/// Work items of the iterative per-track build
enum Step {
    Visit { start: usize, end: usize },
    Join,
}

/// Writes hierarchy nodes through a write transaction
pub struct HierarchyBuilder<'t, 'c> {
    txn: &'t WriteTxn<'c>,
    rule: SplittingRule,
    stats: BuildStats,
}

impl<'t, 'c> HierarchyBuilder<'t, 'c> {
    pub fn new(txn: &'t WriteTxn<'c>, rule: SplittingRule) -> Self {
        Self {
            txn,
            rule,
            stats: BuildStats::default(),
        }
    }

    pub fn stats(&self) -> BuildStats {
        self.stats
    }

    /// Build one track's hierarchy; `None` for a track without intervals
    pub fn build_track(
        &mut self,
        track: u32,
        events: &TrackEvents,
    ) -> StorageResult<Option<BuiltNode>> {
        if events.is_empty() {
            return Ok(None);
        }

        let mut steps = vec![Step::Visit {
            start: 0,
            end: events.event_count() - 1,
        }];
        let mut finished: Vec<BuiltNode> = Vec::new();

        while let Some(step) = steps.pop() {
            match step {
                Step::Visit { start, end } => {
                    if start + 1 == end {
                        finished.push(self.leaf(track, events.interval_at(start))?);
                        continue;
                    }
                    match self.rule.split(events, start, end) {
                        Some(mid) => {
                            steps.push(Step::Join);
                            steps.push(Step::Visit { start: mid, end });
                            steps.push(Step::Visit {
                                start,
                                end: mid - 1,
                            });
                        }
                        None => finished.push(self.collapsed(track, events, start, end)?),
                    }
                }
                Step::Join => {
                    let right = finished.pop();
                    let left = finished.pop();
                    if let (Some(left), Some(right)) = (left, right) {
                        finished.push(self.join(left, right)?);
                    }
                }
            }
        }

        Ok(finished.pop())
    }

    /// Build a single hierarchy over all tracks
    ///
    /// Tracks are addressed by their position in `tracks`.
    pub fn build_two_dimensional(
        &mut self,
        tracks: &[TrackEvents],
    ) -> StorageResult<Option<BuiltNode>> {
        if tracks.is_empty() {
            return Ok(None);
        }
        self.build_window(
            tracks,
            f64::NEG_INFINITY,
            f64::INFINITY,
            0,
            tracks.len() - 1,
            0,
        )
    }

    /// Windows are half-open `[lo, hi)`; intervals crossing a time split are
    /// clipped into one piece per side. Depth is bounded by the number of
    /// halvings of the time extent plus those of the track range.
    fn build_window(
        &mut self,
        tracks: &[TrackEvents],
        lo: f64,
        hi: f64,
        first: usize,
        last: usize,
        depth: usize,
    ) -> StorageResult<Option<BuiltNode>> {
        if first == last {
            let pieces = tracks[first].clipped(lo, hi);
            if pieces.is_empty() {
                return Ok(None);
            }
            return self.build_track(first as u32, &TrackEvents::from_sorted(pieces));
        }

        let extent = tracks[first..=last]
            .iter()
            .filter_map(|t| t.extent(lo, hi))
            .reduce(|(a, b), (c, d)| (a.min(c), b.max(d)));
        let Some((covered_start, covered_end)) = extent else {
            return Ok(None);
        };

        let (left, right) = match time_split(covered_start, covered_end) {
            Some(mid) if depth % 2 == 0 => (
                self.build_window(tracks, lo, mid, first, last, depth + 1)?,
                self.build_window(tracks, mid, hi, first, last, depth + 1)?,
            ),
            _ => {
                let mid = (first + last) / 2;
                (
                    self.build_window(tracks, lo, hi, first, mid, depth + 1)?,
                    self.build_window(tracks, lo, hi, mid + 1, last, depth + 1)?,
                )
            }
        };

        match (left, right) {
            (Some(left), Some(right)) => self.join(left, right).map(Some),
            (one, None) | (None, one) => Ok(one),
        }
    }

    fn leaf(&mut self, track: u32, interval: &EventInterval) -> StorageResult<BuiltNode> {
        let mut attributes = AttributeSets::new();
        attributes.insert(ATTR_PRIMITIVE, interval.primitive);
        attributes.insert(ATTR_ID, interval.id);

        let node = Node::new(
            TimeSpan::new(interval.start, interval.end),
            TrackSpan::single(track),
            attributes,
        );
        self.stats.leaves += 1;
        self.persist(&node)
    }

    /// Single childless node standing in for an inseparable range
    fn collapsed(
        &mut self,
        track: u32,
        events: &TrackEvents,
        start: usize,
        end: usize,
    ) -> StorageResult<BuiltNode> {
        let covered = &events.intervals()[start / 2..=end / 2];

        let mut time = TimeSpan::new(covered[0].start, covered[0].end);
        let mut attributes = AttributeSets::new();
        for interval in covered {
            time = time.union(&TimeSpan::new(interval.start, interval.end));
            attributes.insert(ATTR_PRIMITIVE, interval.primitive);
            attributes.insert(ATTR_ID, interval.id);
        }

        tracing::debug!(
            track,
            intervals = covered.len(),
            rule = %self.rule,
            "Splitting rule could not separate range"
        );
        self.stats.collapsed += 1;
        self.persist(&Node::new(time, TrackSpan::single(track), attributes))
    }

    fn join(&mut self, left: BuiltNode, right: BuiltNode) -> StorageResult<BuiltNode> {
        let mut attributes = left.attributes;
        attributes.merge(&right.attributes);

        let mut node = Node::new(
            left.time.union(&right.time),
            left.tracks.union(&right.tracks),
            attributes,
        );
        node.left = Some(left.id);
        node.right = Some(right.id);
        self.persist(&node)
    }

    fn persist(&mut self, node: &Node) -> StorageResult<BuiltNode> {
        self.txn.put(node)?;
        self.stats.nodes_written += 1;
        Ok(BuiltNode::from_node(node))
    }
}

/// Time split point strictly inside `(start, end)`, if any
fn time_split(start: f64, end: f64) -> Option<f64> {
    let mid = ((start + end) / 2.0).floor();
    (start < mid && mid < end).then_some(mid)
}
