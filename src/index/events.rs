//! Per-track interval lists
//!
//! A track's intervals are viewed as a flat boundary-event sequence: event
//! `2k` is the start of interval `k` and event `2k + 1` its end. The builder
//! addresses ranges of that sequence, so intervals must be ordered by start
//! before construction ([`TrackEvents::seal`]).

/// One ingested interval with its interned attributes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventInterval {
    pub start: f64,
    pub end: f64,
    pub primitive: u32,
    pub id: u32,
}

/// Pending intervals of one track
#[derive(Debug, Clone, Default)]
pub struct TrackEvents {
    intervals: Vec<EventInterval>,
    /// Running maximum of interval ends, valid once sealed
    max_end: Vec<f64>,
    sealed: bool,
}

impl TrackEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interval: EventInterval) {
        self.intervals.push(interval);
        self.sealed = false;
    }

    /// Sort by start time (stable) and prepare window lookups
    pub fn seal(&mut self) {
        if self.sealed {
            return;
        }
        self.intervals
            .sort_by(|a, b| a.start.total_cmp(&b.start));

        let mut running = f64::NEG_INFINITY;
        self.max_end = self
            .intervals
            .iter()
            .map(|iv| {
                running = running.max(iv.end);
                running
            })
            .collect();
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn intervals(&self) -> &[EventInterval] {
        &self.intervals
    }

    /// Number of boundary events
    pub fn event_count(&self) -> usize {
        self.intervals.len() * 2
    }

    /// Time of a boundary event
    pub fn event_time(&self, event: usize) -> f64 {
        let interval = &self.intervals[event / 2];
        if event % 2 == 0 {
            interval.start
        } else {
            interval.end
        }
    }

    /// Interval owning a boundary event
    pub fn interval_at(&self, event: usize) -> &EventInterval {
        &self.intervals[event / 2]
    }

    /// Pieces of the intervals overlapping the half-open window `[lo, hi)`,
    /// clipped to it
    ///
    /// A zero-length interval belongs to the window when `lo <= t < hi`.
    pub fn clipped(&self, lo: f64, hi: f64) -> Vec<EventInterval> {
        self.in_window(lo, hi)
            .map(|iv| EventInterval {
                start: iv.start.max(lo),
                end: iv.end.min(hi),
                ..*iv
            })
            .collect()
    }

    /// Clipped time extent of the intervals overlapping `[lo, hi)`
    pub fn extent(&self, lo: f64, hi: f64) -> Option<(f64, f64)> {
        self.in_window(lo, hi).fold(None, |acc, iv| {
            let (start, end) = (iv.start.max(lo), iv.end.min(hi));
            Some(match acc {
                Some((a, b)) => (f64::min(a, start), f64::max(b, end)),
                None => (start, end),
            })
        })
    }

    fn in_window(&self, lo: f64, hi: f64) -> impl Iterator<Item = &EventInterval> {
        debug_assert!(self.sealed, "window lookup on an unsealed track");

        // Everything before `first` ends before `lo`
        let first = self.max_end.partition_point(|&end| end < lo);
        let last = self.intervals.partition_point(|iv| iv.start < hi);

        self.intervals[first.min(last)..last]
            .iter()
            .filter(move |iv| iv.end > lo || (iv.start == iv.end && iv.start >= lo))
    }

    /// Build a sealed track directly from already-ordered pieces
    pub(crate) fn from_sorted(intervals: Vec<EventInterval>) -> Self {
        let mut track = Self {
            intervals,
            max_end: Vec::new(),
            sealed: false,
        };
        track.seal();
        track
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(start: f64, end: f64, id: u32) -> EventInterval {
        EventInterval {
            start,
            end,
            primitive: 0,
            id,
        }
    }

    #[test]
    fn test_seal_orders_by_start() {
        let mut track = TrackEvents::new();
        track.push(iv(20.0, 30.0, 1));
        track.push(iv(0.0, 10.0, 0));
        track.seal();

        assert_eq!(track.event_count(), 4);
        assert_eq!(track.event_time(0), 0.0);
        assert_eq!(track.event_time(1), 10.0);
        assert_eq!(track.event_time(2), 20.0);
        assert_eq!(track.interval_at(3).id, 1);
    }

    #[test]
    fn test_clipped_window() {
        let mut track = TrackEvents::new();
        track.push(iv(0.0, 10.0, 0));
        track.push(iv(20.0, 30.0, 1));
        track.push(iv(40.0, 40.0, 2));
        track.seal();

        let pieces = track.clipped(5.0, 25.0);
        assert_eq!(pieces, vec![iv(5.0, 10.0, 0), iv(20.0, 25.0, 1)]);

        // An interval ending at the window start belongs to the left window
        assert!(track.clipped(10.0, 15.0).is_empty());

        // Zero-length intervals go to the window starting at their time
        assert_eq!(track.clipped(40.0, 50.0), vec![iv(40.0, 40.0, 2)]);
        assert!(track.clipped(30.0, 40.0).is_empty());

        assert_eq!(track.extent(5.0, 25.0), Some((5.0, 25.0)));
        assert_eq!(track.extent(f64::NEG_INFINITY, f64::INFINITY), Some((0.0, 40.0)));
        assert_eq!(track.extent(31.0, 39.0), None);
    }
}
