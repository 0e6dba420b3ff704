//! Hierarchy node model and its line-oriented record format
//!
//! A node aggregates a time range, a track range and the attribute indices of
//! every interval below it. Records are plain text so they can be inspected
//! straight out of the store:
//!
//! ```text
//! <start> <end> <start_track> <end_track>
//! <attribute key count>
//! <key> <value count>
//! <v1> <v2> ...
//! <left child id | NULL>
//! <right child id | NULL>
//! ```

use crate::storage::error::{StorageError, StorageResult};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use uuid::Uuid;

/// Attribute key holding the interned primitive name
pub const ATTR_PRIMITIVE: &str = "primitive";
/// Attribute key holding the interned interval id
pub const ATTR_ID: &str = "id";

/// Sentinel written in place of an absent child
const ABSENT_CHILD: &str = "NULL";

/// Opaque, never-reused node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Allocate a fresh identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identifier, treating the absent-child sentinel and blanks as `None`
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || s == ABSENT_CHILD {
            return None;
        }
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Closed time range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSpan {
    pub start: f64,
    pub end: f64,
}

impl TimeSpan {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Length of the range
    pub fn span(&self) -> f64 {
        self.end - self.start
    }

    /// Whether this range overlaps the half-open query window `[begin, end)`
    pub fn intersects(&self, begin: f64, end: f64) -> bool {
        self.start < end && self.end > begin
    }

    /// Whether this range fully contains `[start, end]`
    pub fn contains(&self, start: f64, end: f64) -> bool {
        self.start <= start && end <= self.end
    }

    /// Whether this range lies inside `[start, end]`
    pub fn within(&self, start: f64, end: f64) -> bool {
        start <= self.start && self.end <= end
    }

    pub fn union(&self, other: &TimeSpan) -> TimeSpan {
        TimeSpan::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// Inclusive range of interned track indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackSpan {
    pub start: u32,
    pub end: u32,
}

impl TrackSpan {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn single(track: u32) -> Self {
        Self::new(track, track)
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    /// Whether any track of this span falls inside `[first, last]`
    pub fn overlaps(&self, first: u32, last: u32) -> bool {
        self.start <= last && self.end >= first
    }

    /// Whether every track of this span falls inside `[first, last]`
    pub fn within(&self, first: u32, last: u32) -> bool {
        first <= self.start && self.end <= last
    }

    pub fn union(&self, other: &TrackSpan) -> TrackSpan {
        TrackSpan::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// Per-key sets of interned attribute indices
///
/// Internal nodes hold the union of their children's sets, so a key/value
/// missing here is missing from the whole subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSets(BTreeMap<String, BTreeSet<u32>>);

impl AttributeSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, index: u32) {
        if let Some(set) = self.0.get_mut(key) {
            set.insert(index);
        } else {
            self.0.insert(key.to_string(), BTreeSet::from([index]));
        }
    }

    /// Union another node's sets into this one
    pub fn merge(&mut self, other: &AttributeSets) {
        for (key, values) in &other.0 {
            self.0
                .entry(key.clone())
                .or_default()
                .extend(values.iter().copied());
        }
    }

    pub fn get(&self, key: &str) -> Option<&BTreeSet<u32>> {
        self.0.get(key)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn contains(&self, key: &str, index: u32) -> bool {
        self.0.get(key).map(|set| set.contains(&index)).unwrap_or(false)
    }

    /// Representative value for a key (the smallest index)
    pub fn first(&self, key: &str) -> Option<u32> {
        self.0.get(key).and_then(|set| set.iter().next().copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<u32>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One persisted element of the interval hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub time: TimeSpan,
    pub tracks: TrackSpan,
    pub attributes: AttributeSets,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
}

impl Node {
    /// Create a childless node with a fresh id
    pub fn new(time: TimeSpan, tracks: TrackSpan, attributes: AttributeSets) -> Self {
        Self {
            id: NodeId::generate(),
            time,
            tracks,
            attributes,
            left: None,
            right: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    /// Serialize into the line-oriented record format
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(128);
        // Writing into a String cannot fail
        let _ = writeln!(
            out,
            "{} {} {} {}",
            self.time.start, self.time.end, self.tracks.start, self.tracks.end
        );
        let _ = writeln!(out, "{}", self.attributes.len());
        for (key, values) in self.attributes.iter() {
            let _ = writeln!(out, "{} {}", key, values.len());
            let line: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            let _ = writeln!(out, "{}", line.join(" "));
        }
        let _ = writeln!(out, "{}", child_token(self.left));
        let _ = writeln!(out, "{}", child_token(self.right));
        out
    }

    /// Parse a record previously produced by [`Node::encode`]
    pub fn decode(id: NodeId, record: &str) -> StorageResult<Self> {
        let corrupt = |reason: &str| StorageError::CorruptNode {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        let mut lines = record.lines();

        let header = lines.next().ok_or_else(|| corrupt("missing header"))?;
        let fields: Vec<&str> = header.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(corrupt("header needs four fields"));
        }
        let start: f64 = fields[0].parse().map_err(|_| corrupt("bad start time"))?;
        let end: f64 = fields[1].parse().map_err(|_| corrupt("bad end time"))?;
        let start_track: u32 = fields[2].parse().map_err(|_| corrupt("bad start track"))?;
        let end_track: u32 = fields[3].parse().map_err(|_| corrupt("bad end track"))?;

        let key_count: usize = lines
            .next()
            .and_then(|l| l.trim().parse().ok())
            .ok_or_else(|| corrupt("bad attribute count"))?;

        let mut attributes = AttributeSets::new();
        for _ in 0..key_count {
            let key_line = lines.next().ok_or_else(|| corrupt("missing attribute key"))?;
            let (key, count) = key_line
                .trim()
                .rsplit_once(' ')
                .ok_or_else(|| corrupt("bad attribute key line"))?;
            let count: usize = count.parse().map_err(|_| corrupt("bad value count"))?;

            let values_line = lines.next().ok_or_else(|| corrupt("missing attribute values"))?;
            let values: Vec<u32> = values_line
                .split_whitespace()
                .map(str::parse)
                .collect::<Result<_, _>>()
                .map_err(|_| corrupt("bad attribute value"))?;
            if values.len() != count {
                return Err(corrupt("attribute value count mismatch"));
            }
            for value in values {
                attributes.insert(key, value);
            }
        }

        let left = lines.next().and_then(NodeId::parse);
        let right = lines.next().and_then(NodeId::parse);

        Ok(Self {
            id,
            time: TimeSpan::new(start, end),
            tracks: TrackSpan::new(start_track, end_track),
            attributes,
            left,
            right,
        })
    }
}

fn child_token(child: Option<NodeId>) -> String {
    child
        .map(|id| id.to_string())
        .unwrap_or_else(|| ABSENT_CHILD.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node() -> Node {
        let mut attributes = AttributeSets::new();
        attributes.insert(ATTR_PRIMITIVE, 3);
        attributes.insert(ATTR_PRIMITIVE, 1);
        attributes.insert(ATTR_ID, 42);

        let mut node = Node::new(
            TimeSpan::new(1.5, 1_000_000.25),
            TrackSpan::new(2, 7),
            attributes,
        );
        node.left = Some(NodeId::generate());
        node
    }

    #[test]
    fn test_encode_decode_preserves_node() {
        let node = sample_node();
        let decoded = Node::decode(node.id, &node.encode()).unwrap();

        assert_eq!(decoded, node);
        assert!(decoded.right.is_none());
        assert!(!decoded.is_leaf());
    }

    #[test]
    fn test_encoded_layout() {
        let mut attributes = AttributeSets::new();
        attributes.insert(ATTR_ID, 0);
        let node = Node::new(TimeSpan::new(0.0, 10.0), TrackSpan::single(4), attributes);

        let encoded = node.encode();
        let lines: Vec<&str> = encoded.lines().collect();
        assert_eq!(lines, vec!["0 10 4 4", "1", "id 1", "0", "NULL", "NULL"]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let id = NodeId::generate();
        assert!(Node::decode(id, "").is_err());
        assert!(Node::decode(id, "1 2 3\n0\nNULL\nNULL\n").is_err());
        assert!(Node::decode(id, "1 2 3 3\n1\nid 2\n5\nNULL\nNULL\n").is_err());
    }

    #[test]
    fn test_attribute_merge_is_union() {
        let mut left = AttributeSets::new();
        left.insert(ATTR_PRIMITIVE, 0);
        left.insert(ATTR_ID, 0);

        let mut right = AttributeSets::new();
        right.insert(ATTR_PRIMITIVE, 1);
        right.insert(ATTR_ID, 1);

        left.merge(&right);
        assert!(left.contains(ATTR_PRIMITIVE, 0));
        assert!(left.contains(ATTR_PRIMITIVE, 1));
        assert_eq!(left.get(ATTR_ID).map(|s| s.len()), Some(2));
        assert_eq!(left.first(ATTR_ID), Some(0));
    }

    #[test]
    fn test_time_span_predicates() {
        let span = TimeSpan::new(10.0, 20.0);
        assert!(span.intersects(0.0, 11.0));
        assert!(!span.intersects(0.0, 10.0));
        assert!(!span.intersects(20.0, 30.0));
        assert!(span.contains(12.0, 20.0));
        assert!(span.within(10.0, 25.0));
    }

    #[test]
    fn test_node_id_parse_sentinel() {
        assert!(NodeId::parse("NULL").is_none());
        assert!(NodeId::parse("").is_none());
        let id = NodeId::generate();
        assert_eq!(NodeId::parse(&id.to_string()), Some(id));
    }
}
