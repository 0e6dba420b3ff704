//! Splitting rules for per-track construction
//!
//! All rules work on an inclusive boundary-event range `[start, end]` where
//! `start` is a start event (even) and `end` an end event (odd), and return the
//! first event of the right half. A returned split always leaves at least one
//! whole interval on each side; `None` means the range cannot be separated.

use crate::index::events::TrackEvents;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Heuristic choosing where a node divides its intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplittingRule {
    /// Equal interval counts on both sides
    #[default]
    Fair,
    /// Split at the event nearest the middle of the time range
    Midpoint,
    /// Split at the widest gap between consecutive intervals
    MaxDistance,
}

impl SplittingRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplittingRule::Fair => "fair",
            SplittingRule::Midpoint => "midpoint",
            SplittingRule::MaxDistance => "max_distance",
        }
    }

    /// First event of the right half for `[start, end]`
    pub fn split(&self, events: &TrackEvents, start: usize, end: usize) -> Option<usize> {
        let mid = match self {
            SplittingRule::Fair => fair(start, end),
            SplittingRule::Midpoint => midpoint(events, start, end),
            SplittingRule::MaxDistance => max_distance(events, start, end),
        };
        (mid > start && mid < end).then_some(mid)
    }
}

impl fmt::Display for SplittingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SplittingRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fair" => Ok(SplittingRule::Fair),
            "midpoint" => Ok(SplittingRule::Midpoint),
            "max_distance" => Ok(SplittingRule::MaxDistance),
            other => Err(format!("unknown splitting rule '{}'", other)),
        }
    }
}

/// Snap down to a start event, never onto the range start itself
fn snap(start: usize, mut mid: usize) -> usize {
    if mid % 2 == 1 {
        mid -= 1;
    }
    if mid == start {
        mid = start + 2;
    }
    mid
}

fn fair(start: usize, end: usize) -> usize {
    snap(start, start + (end + 1 - start) / 2)
}

fn midpoint(events: &TrackEvents, start: usize, end: usize) -> usize {
    let lo = events.event_time(start);
    let hi = events.event_time(end);
    let middle = lo + (hi - lo) / 2.0;

    let times: Vec<f64> = (start..=end).map(|e| events.event_time(e)).collect();
    let offset = times.partition_point(|&t| t <= middle);
    snap(start, start + offset)
}

fn max_distance(events: &TrackEvents, start: usize, end: usize) -> usize {
    let mut mid = start + 2;
    let mut widest = 0.0;

    // Gap between the end of one interval and the start of the next
    let mut event = start + 1;
    while event < end {
        let gap = events.event_time(event + 1) - events.event_time(event);
        if gap > widest {
            widest = gap;
            mid = event + 1;
        }
        event += 2;
    }
    mid
}
