//! Segment → bin coverage
//!
//! Bins are `width` wide and anchored at the window start; the remainder past
//! `bins * width` is not represented. An end value is 1.0 when the time is a
//! multiple of the width and 0.5 otherwise, so with a window start that is
//! not a multiple of the width even a bin-boundary end scores 0.5.
//!
//! ```text
//! begin=0, end=30, bins=3        width = 10
//! |---- bin 0 ----|---- bin 1 ----|---- bin 2 ----|
//! 0              10              20              30
//! segment [0, 10]  → bin 0 = 1.0  (both ends on multiples of 10)
//! segment [22, 30] → bin 2 = 0.5  (start inside the bin)
//! ```

/// Coverage of a bin touched by a segment end inside it
pub const PARTIAL: f64 = 0.5;
/// Coverage of a fully crossed bin or one touched at a boundary
pub const FULL: f64 = 1.0;

/// Bin width for a window, at least one time unit
pub fn bin_width(begin: f64, end: f64, bins: usize) -> f64 {
    if bins == 0 {
        return 1.0;
    }
    ((end - begin) / bins as f64).floor().max(1.0)
}

/// Accumulates covered segments into `bins` values
#[derive(Debug, Clone)]
pub struct BinAccumulator {
    begin: f64,
    end: f64,
    width: f64,
    values: Vec<f64>,
    /// False for a degenerate window; such a window stays all zeros
    open: bool,
}

impl BinAccumulator {
    /// Always holds `bins` values; a degenerate window leaves them at zero
    pub fn new(begin: f64, end: f64, bins: usize) -> Self {
        Self {
            begin,
            end,
            width: bin_width(begin, end, bins),
            values: vec![0.0; bins],
            open: begin < end,
        }
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    /// Coverage value of a segment end landing at `t`
    fn end_value(&self, t: f64) -> f64 {
        if t % self.width == 0.0 {
            FULL
        } else {
            PARTIAL
        }
    }

    /// Whether `t` falls on a boundary between bins
    fn on_boundary(&self, t: f64) -> bool {
        (t - self.begin) % self.width == 0.0
    }

    fn bin_of(&self, t: f64) -> i64 {
        ((t - self.begin) / self.width).floor() as i64
    }

    fn raise(&mut self, bin: i64, value: f64) {
        if bin < 0 {
            return;
        }
        if let Some(slot) = self.values.get_mut(bin as usize) {
            if *slot < value {
                *slot = value;
            }
        }
    }

    /// Record coverage of `[start, end]`, clamped to the window
    pub fn add(&mut self, start: f64, end: f64) {
        if !self.open || self.values.is_empty() || end < self.begin || start > self.end {
            return;
        }
        let start = start.max(self.begin);
        let end = end.min(self.end);

        let first = self.bin_of(start);
        let mut last = self.bin_of(end);
        // A segment ending on a boundary covers the bin that ends there
        let mut end_value = self.end_value(end);
        if end > start && self.on_boundary(end) {
            last -= 1;
            end_value = FULL;
        }
        let last = last.max(first);

        for bin in first + 1..last {
            self.raise(bin, FULL);
        }

        self.raise(first, self.end_value(start));
        if last != first {
            self.raise(last, end_value);
        }
    }

    pub fn finish(self) -> Vec<f64> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulate(begin: f64, end: f64, bins: usize, segments: &[(f64, f64)]) -> Vec<f64> {
        let mut acc = BinAccumulator::new(begin, end, bins);
        for &(s, e) in segments {
            acc.add(s, e);
        }
        acc.finish()
    }

    #[test]
    fn test_bin_width() {
        assert_eq!(bin_width(0.0, 30.0, 3), 10.0);
        assert_eq!(bin_width(0.0, 31.0, 3), 10.0);
        assert_eq!(bin_width(0.0, 2.0, 8), 1.0);
    }

    #[test]
    fn test_aligned_segments_are_full() {
        let bins = accumulate(0.0, 30.0, 3, &[(0.0, 10.0), (20.0, 30.0)]);
        assert_eq!(bins, vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unaligned_ends_are_partial() {
        let bins = accumulate(0.0, 40.0, 4, &[(5.0, 35.0)]);
        assert_eq!(bins, vec![0.5, 1.0, 1.0, 0.5]);
    }

    #[test]
    fn test_segment_inside_one_bin() {
        assert_eq!(accumulate(0.0, 30.0, 3, &[(12.0, 14.0)]), vec![0.0, 0.5, 0.0]);
        assert_eq!(accumulate(0.0, 30.0, 3, &[(10.0, 14.0)]), vec![0.0, 1.0, 0.0]);
        assert_eq!(accumulate(0.0, 30.0, 3, &[(20.0, 20.0)]), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_clamped_to_window() {
        let bins = accumulate(10.0, 40.0, 3, &[(0.0, 15.0), (38.0, 90.0)]);
        assert_eq!(bins, vec![1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_never_downgrades() {
        let forward = accumulate(0.0, 30.0, 3, &[(12.0, 14.0), (10.0, 20.0)]);
        let backward = accumulate(0.0, 30.0, 3, &[(10.0, 20.0), (12.0, 14.0)]);
        assert_eq!(forward, vec![0.0, 1.0, 0.0]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_unanchored_window_uses_absolute_alignment() {
        // Bins are [5, 15), [15, 25), [25, 35)
        assert_eq!(accumulate(5.0, 35.0, 3, &[(15.0, 25.0)]), vec![0.0, 0.5, 0.0]);
        assert_eq!(accumulate(5.0, 35.0, 3, &[(10.0, 20.0)]), vec![1.0, 1.0, 0.0]);
        assert_eq!(accumulate(5.0, 35.0, 3, &[(7.0, 30.0)]), vec![0.5, 1.0, 1.0]);
        assert_eq!(accumulate(5.0, 35.0, 3, &[(7.0, 31.0)]), vec![0.5, 1.0, 0.5]);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(accumulate(10.0, 10.0, 4, &[(0.0, 20.0)]), vec![0.0; 4]);
        assert_eq!(accumulate(30.0, 10.0, 2, &[(0.0, 20.0)]), vec![0.0; 2]);
        assert!(accumulate(0.0, 10.0, 0, &[(0.0, 20.0)]).is_empty());
    }
}
