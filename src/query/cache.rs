//! Hot node cache
//!
//! Each track keeps an owned in-memory subtree rooted at a node believed to
//! cover the next queries. Successive pans and zooms mostly land inside it, so
//! only the nodes below the cached root need loading.
//!
//! ```text
//! query [s, e], span = e - s, window = [s - m·span, e + m·span]
//!
//!   nothing cached              → cold:     lowest node covering window, from the persisted root
//!   cached ∩ [s, e] = ∅         → jump:     drop cache, same search
//!   cached ⊉ [s, e]             → partial:  search from the persisted root, grafting the old subtree
//!   cached ⊇ [s, e]             → contained: reuse
//! ```
//!
//! A cached root is only reusable while its parent would not have stopped
//! the traversal at the current bin size, and while the query stays clear of
//! the siblings discarded on the way down. Warm and cold queries therefore
//! emit the same nodes.

use crate::storage::{Node, NodeId, NodeSource};

/// In-memory copy of a persisted node with lazily loaded children
#[derive(Debug, Clone)]
pub struct CachedNode {
    pub node: Node,
    pub left: Option<Box<CachedNode>>,
    pub right: Option<Box<CachedNode>>,
}

impl CachedNode {
    pub fn new(node: Node) -> Box<Self> {
        Box::new(Self {
            node,
            left: None,
            right: None,
        })
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    /// Number of nodes currently held in memory under (and including) this one
    pub fn resident_nodes(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.left.as_deref());
            stack.extend(node.right.as_deref());
        }
        count
    }

    /// Drop everything more than `levels - 1` levels below this node
    pub fn retain_levels(&mut self, levels: usize) {
        if levels <= 1 {
            self.left = None;
            self.right = None;
            return;
        }
        for child in [self.left.as_deref_mut(), self.right.as_deref_mut()]
            .into_iter()
            .flatten()
        {
            child.retain_levels(levels - 1);
        }
    }
}

/// Loads nodes on demand for one query
///
/// Holds at most one graft: a previously cached subtree handed back in place
/// of a fresh load when its id comes up again.
pub struct Materializer<'a> {
    source: &'a dyn NodeSource,
    graft: Option<Box<CachedNode>>,
    loaded: u64,
}

impl<'a> Materializer<'a> {
    pub fn new(source: &'a dyn NodeSource) -> Self {
        Self {
            source,
            graft: None,
            loaded: 0,
        }
    }

    pub fn set_graft(&mut self, subtree: Box<CachedNode>) {
        self.graft = Some(subtree);
    }

    pub fn has_graft(&self) -> bool {
        self.graft.is_some()
    }

    /// Nodes read from the store so far
    pub fn loaded(&self) -> u64 {
        self.loaded
    }

    /// Load a node; a failed or missing load is an absent subtree
    pub fn load(&mut self, id: NodeId) -> Option<Box<CachedNode>> {
        if self.graft.as_ref().map(|g| g.id()) == Some(id) {
            tracing::trace!(node = %id, "Reusing cached subtree");
            return self.graft.take();
        }

        match self.source.load(id) {
            Ok(Some(node)) => {
                self.loaded += 1;
                Some(CachedNode::new(node))
            }
            Ok(None) => {
                tracing::debug!(node = %id, "Node missing from store, pruning");
                None
            }
            Err(e) => {
                tracing::error!(node = %id, "Failed to load node: {}", e);
                None
            }
        }
    }

    /// Load whichever children of `cached` are not yet in memory
    pub fn child(&mut self, cached: &mut CachedNode) {
        if cached.left.is_none() {
            if let Some(id) = cached.node.left {
                cached.left = self.load(id);
            }
        }
        if cached.right.is_none() {
            if let Some(id) = cached.node.right {
                cached.right = self.load(id);
            }
        }
    }
}

/// Result of a covering search
#[derive(Debug)]
pub struct Covering {
    pub node: Box<CachedNode>,
    /// Span of the node's parent, infinite when no descent happened
    pub parent_span: f64,
    /// Window outside which a discarded sibling may hold intervals
    pub floor: f64,
    pub ceiling: f64,
}

enum Descend {
    /// Right sibling starts at the given time, past the window
    Left(f64),
    /// Left sibling ends at the given time, before the window
    Right(f64),
    Stop,
}

/// Descend to the lowest node still covering `[lo, hi]`
///
/// Never descends out of a node whose span is within `stop_span`.
pub fn lowest_covering(
    materializer: &mut Materializer<'_>,
    mut current: Box<CachedNode>,
    lo: f64,
    hi: f64,
    stop_span: f64,
) -> Covering {
    let mut parent_span = f64::INFINITY;
    let (mut floor, mut ceiling) = (f64::NEG_INFINITY, f64::INFINITY);

    loop {
        let time = current.node.time;
        if time.within(lo, hi) || time.span() <= stop_span || current.node.is_leaf() {
            break;
        }

        materializer.child(&mut current);
        let descend = match (&current.left, &current.right) {
            (Some(_), Some(right)) if right.node.time.start > hi => {
                Descend::Left(right.node.time.start)
            }
            (Some(left), Some(_)) if left.node.time.end < lo => Descend::Right(left.node.time.end),
            _ => Descend::Stop,
        };
        let next = match descend {
            Descend::Left(sibling_start) => {
                ceiling = ceiling.min(sibling_start);
                current.left.take()
            }
            Descend::Right(sibling_end) => {
                floor = floor.max(sibling_end);
                current.right.take()
            }
            Descend::Stop => None,
        };

        match next {
            Some(next) => {
                parent_span = time.span();
                current = next;
            }
            None => break,
        }
    }

    Covering {
        node: current,
        parent_span,
        floor,
        ceiling,
    }
}

/// How a query was matched against the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// Track has no persisted hierarchy
    Empty,
    Cold,
    Jump,
    PartialOverlap,
    Contained,
}

/// Hot subtree of one track
#[derive(Debug)]
pub struct TrackCache {
    persisted_root: Option<NodeId>,
    cached: Option<Box<CachedNode>>,
    /// Span of the cached root's parent
    parent_span: f64,
    /// Queries inside `[floor, ceiling]` need nothing outside the cached root
    floor: f64,
    ceiling: f64,
}

impl TrackCache {
    pub fn new(persisted_root: Option<NodeId>) -> Self {
        Self {
            persisted_root,
            cached: None,
            parent_span: f64::INFINITY,
            floor: f64::NEG_INFINITY,
            ceiling: f64::INFINITY,
        }
    }

    pub fn cached_root(&self) -> Option<NodeId> {
        self.cached.as_ref().map(|c| c.id())
    }

    pub fn root_mut(&mut self) -> Option<&mut CachedNode> {
        self.cached.as_deref_mut()
    }

    pub fn resident_nodes(&self) -> usize {
        self.cached.as_ref().map(|c| c.resident_nodes()).unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.cached = None;
        self.reset_bounds();
    }

    fn reset_bounds(&mut self) {
        self.parent_span = f64::INFINITY;
        self.floor = f64::NEG_INFINITY;
        self.ceiling = f64::INFINITY;
    }

    /// Bound memory after a query
    pub fn evict(&mut self, retained_levels: usize) {
        if let Some(cached) = self.cached.as_deref_mut() {
            cached.retain_levels(retained_levels.max(1));
        }
    }

    /// Position the cached root for the query `[q_start, q_end]`
    ///
    /// A subtree displaced in the partial-overlap case is left in the
    /// materializer as a graft so the traversal can still reuse it.
    pub fn prepare(
        &mut self,
        materializer: &mut Materializer<'_>,
        q_start: f64,
        q_end: f64,
        stop_span: f64,
        margin: f64,
    ) -> CacheDecision {
        let Some(root_id) = self.persisted_root else {
            return CacheDecision::Empty;
        };
        let (lo, hi) = expanded_window(q_start, q_end, margin);

        let Some(cached) = self.cached.take() else {
            self.reload(materializer, root_id, lo, hi, stop_span);
            return CacheDecision::Cold;
        };

        let time = cached.node.time;
        if time.start > q_end || time.end < q_start {
            drop(cached);
            self.reload(materializer, root_id, lo, hi, stop_span);
            return CacheDecision::Jump;
        }

        let is_root = cached.id() == root_id;
        let reusable = is_root
            || (stop_span < self.parent_span && q_start >= self.floor && q_end <= self.ceiling);
        if time.contains(q_start, q_end) && reusable {
            self.cached = Some(cached);
            return CacheDecision::Contained;
        }

        if is_root {
            // Already at the top; nothing better to load
            self.cached = Some(cached);
            self.reset_bounds();
            return CacheDecision::PartialOverlap;
        }

        materializer.set_graft(cached);
        self.reload(materializer, root_id, lo, hi, stop_span);
        CacheDecision::PartialOverlap
    }

    fn reload(
        &mut self,
        materializer: &mut Materializer<'_>,
        root_id: NodeId,
        lo: f64,
        hi: f64,
        stop_span: f64,
    ) {
        self.reset_bounds();
        self.cached = materializer.load(root_id).map(|root| {
            let covering = lowest_covering(materializer, root, lo, hi, stop_span);
            self.parent_span = covering.parent_span;
            self.floor = covering.floor;
            self.ceiling = covering.ceiling;
            covering.node
        });
    }
}

/// Query window widened by `margin` spans on each side
///
/// The lower edge does not cross zero for non-negative queries.
pub fn expanded_window(q_start: f64, q_end: f64, margin: f64) -> (f64, f64) {
    let span = (q_end - q_start).max(0.0);
    let mut lo = q_start - margin * span;
    if q_start >= 0.0 {
        lo = lo.max(0.0);
    }
    (lo, q_end + margin * span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{EventInterval, HierarchyBuilder, SplittingRule, TrackEvents};
    use crate::storage::NodeStore;
    use tempfile::tempdir;

    /// 64 unit intervals at 0, 10, 20, ...
    fn build(store: &mut NodeStore) -> NodeId {
        let mut events = TrackEvents::new();
        for i in 0..64u32 {
            let start = i as f64 * 10.0;
            events.push(EventInterval {
                start,
                end: start + 1.0,
                primitive: 0,
                id: i,
            });
        }
        events.seal();

        let txn = store.write_txn().unwrap();
        let root = HierarchyBuilder::new(&txn, SplittingRule::Fair)
            .build_track(0, &events)
            .unwrap()
            .unwrap();
        txn.commit().unwrap();
        root.id
    }

    #[test]
    fn test_expanded_window() {
        assert_eq!(expanded_window(100.0, 110.0, 2.0), (80.0, 130.0));
        assert_eq!(expanded_window(5.0, 15.0, 2.0), (0.0, 35.0));
        assert_eq!(expanded_window(-10.0, 0.0, 1.0), (-20.0, 10.0));
    }

    #[test]
    fn test_cache_decisions() {
        let dir = tempdir().unwrap();
        let mut store = NodeStore::open(&dir.path().join("nodes.db"), 1 << 26).unwrap();
        let root = build(&mut store);
        let read = store.read_txn().unwrap();

        let mut cache = TrackCache::new(Some(root));

        let mut m = Materializer::new(&read);
        assert_eq!(cache.prepare(&mut m, 100.0, 110.0, 0.0, 2.0), CacheDecision::Cold);
        let first = cache.cached_root().unwrap();
        assert_ne!(first, root);
        let covered = read.get(first).unwrap().unwrap();
        assert!(covered.time.start <= 100.0 && covered.time.end >= 110.0);

        // Zoom in
        let mut m = Materializer::new(&read);
        assert_eq!(cache.prepare(&mut m, 102.0, 105.0, 0.0, 2.0), CacheDecision::Contained);
        assert_eq!(cache.cached_root(), Some(first));
        assert_eq!(m.loaded(), 0);

        // Pan far away
        let mut m = Materializer::new(&read);
        assert_eq!(cache.prepare(&mut m, 600.0, 610.0, 0.0, 2.0), CacheDecision::Jump);
        let far = cache.cached_root().unwrap();
        assert_ne!(far, first);

        // Zoom out past the cached subtree
        let mut m = Materializer::new(&read);
        assert_eq!(
            cache.prepare(&mut m, 300.0, 615.0, 0.0, 2.0),
            CacheDecision::PartialOverlap
        );
        let wide = read.get(cache.cached_root().unwrap()).unwrap().unwrap();
        assert!(wide.time.start <= 300.0 && wide.time.end >= 615.0);
    }

    #[test]
    fn test_overlapping_sibling_blocks_reuse() {
        let dir = tempdir().unwrap();
        let mut store = NodeStore::open(&dir.path().join("nodes.db"), 1 << 26).unwrap();

        // A long interval whose leaf outlives the start of its right sibling
        let mut events = TrackEvents::new();
        events.push(EventInterval { start: 0.0, end: 100.0, primitive: 0, id: 0 });
        events.push(EventInterval { start: 50.0, end: 60.0, primitive: 0, id: 1 });
        events.seal();
        let txn = store.write_txn().unwrap();
        let root = HierarchyBuilder::new(&txn, SplittingRule::Fair)
            .build_track(0, &events)
            .unwrap()
            .unwrap()
            .id;
        txn.commit().unwrap();
        let read = store.read_txn().unwrap();

        let mut cache = TrackCache::new(Some(root));
        let mut m = Materializer::new(&read);
        cache.prepare(&mut m, 0.0, 10.0, 0.0, 2.0);
        assert_ne!(cache.cached_root(), Some(root));

        let mut m = Materializer::new(&read);
        assert_eq!(
            cache.prepare(&mut m, 55.0, 58.0, 0.0, 2.0),
            CacheDecision::PartialOverlap
        );
        assert_eq!(cache.cached_root(), Some(root));
    }

    #[test]
    fn test_coarse_bins_reload_from_root() {
        let dir = tempdir().unwrap();
        let mut store = NodeStore::open(&dir.path().join("nodes.db"), 1 << 26).unwrap();
        let root = build(&mut store);
        let read = store.read_txn().unwrap();

        let mut cache = TrackCache::new(Some(root));
        let mut m = Materializer::new(&read);
        cache.prepare(&mut m, 100.0, 110.0, 0.0, 2.0);
        assert_ne!(cache.cached_root(), Some(root));

        // Same window with bins wider than the whole track
        let mut m = Materializer::new(&read);
        cache.prepare(&mut m, 100.0, 110.0, 10_000.0, 2.0);
        assert_eq!(cache.cached_root(), Some(root));
    }

    #[test]
    fn test_graft_reuses_subtree() {
        let dir = tempdir().unwrap();
        let mut store = NodeStore::open(&dir.path().join("nodes.db"), 1 << 26).unwrap();
        let root = build(&mut store);
        let read = store.read_txn().unwrap();

        let mut m = Materializer::new(&read);
        let mut subtree = m.load(root).unwrap();
        m.child(&mut subtree);
        let left = subtree.left.take().unwrap();
        let left_id = left.id();

        let mut m = Materializer::new(&read);
        m.set_graft(left);
        let mut fresh = m.load(root).unwrap();
        m.child(&mut fresh);
        assert_eq!(fresh.left.as_ref().map(|l| l.id()), Some(left_id));
        assert!(!m.has_graft());
        assert_eq!(m.loaded(), 2);
    }

    #[test]
    fn test_retain_levels() {
        let dir = tempdir().unwrap();
        let mut store = NodeStore::open(&dir.path().join("nodes.db"), 1 << 26).unwrap();
        let root = build(&mut store);
        let read = store.read_txn().unwrap();

        let mut m = Materializer::new(&read);
        let mut tree = m.load(root).unwrap();
        m.child(&mut tree);
        for child in [tree.left.as_deref_mut(), tree.right.as_deref_mut()]
            .into_iter()
            .flatten()
        {
            m.child(child);
        }
        assert_eq!(tree.resident_nodes(), 7);

        tree.retain_levels(2);
        assert_eq!(tree.resident_nodes(), 3);
    }

    #[test]
    fn test_missing_root_is_absent() {
        let dir = tempdir().unwrap();
        let store = NodeStore::open(&dir.path().join("nodes.db"), 1 << 26).unwrap();
        let read = store.read_txn().unwrap();

        let mut cache = TrackCache::new(Some(NodeId::generate()));
        let mut m = Materializer::new(&read);
        assert_eq!(cache.prepare(&mut m, 0.0, 10.0, 0.0, 2.0), CacheDecision::Cold);
        assert!(cache.cached_root().is_none());

        let mut empty = TrackCache::new(None);
        assert_eq!(empty.prepare(&mut m, 0.0, 10.0, 0.0, 2.0), CacheDecision::Empty);
    }
}
