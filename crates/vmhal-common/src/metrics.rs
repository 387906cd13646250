//! Tick interval metrics.
//!
//! The interval timer records the wall-clock distance between consecutive
//! ticks into a fixed ring buffer, so timer accuracy against `tick_unit`
//! can be inspected without allocating on the tick path.

use std::time::Duration;

/// Inter-tick interval statistics with a ring buffer for percentiles.
#[derive(Debug)]
pub struct TickMetrics {
    /// Ring buffer of intervals in nanoseconds.
    samples: Box<[u64]>,
    write_pos: usize,
    /// Number of samples held (saturates at buffer size).
    sample_count: usize,
    total_intervals: u64,
    min_ns: u64,
    max_ns: u64,
    sum_ns: u128,
    /// Intervals longer than one and a half tick units.
    late_count: u64,
    tick_unit_ns: u64,
}

impl TickMetrics {
    /// Create a collector for ticks nominally `tick_unit` apart.
    #[must_use]
    pub fn new(histogram_size: usize, tick_unit: Duration) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_intervals: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
            late_count: 0,
            tick_unit_ns: u64::try_from(tick_unit.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    /// Record the interval between two consecutive ticks.
    pub fn record(&mut self, interval: Duration) {
        let ns = u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX);

        self.samples[self.write_pos] = ns;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total_intervals += 1;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns += u128::from(ns);

        if ns > self.tick_unit_ns.saturating_add(self.tick_unit_ns / 2) {
            self.late_count += 1;
        }
    }

    /// Total intervals recorded.
    #[must_use]
    pub fn total_intervals(&self) -> u64 {
        self.total_intervals
    }

    /// Intervals that overshot the tick unit by more than half a tick.
    #[must_use]
    pub fn late_count(&self) -> u64 {
        self.late_count
    }

    /// Compute a percentile (0.0 to 100.0) from the ring buffer.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        let idx = idx.min(sorted.len() - 1);

        Some(Duration::from_nanos(sorted[idx]))
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> TickMetricsSnapshot {
        let any = self.total_intervals > 0;
        TickMetricsSnapshot {
            total_intervals: self.total_intervals,
            min_ns: any.then_some(self.min_ns),
            max_ns: any.then_some(self.max_ns),
            mean_ns: any.then(|| {
                u64::try_from(self.sum_ns / u128::from(self.total_intervals))
                    .unwrap_or(u64::MAX)
            }),
            late_count: self.late_count,
            sample_count: self.sample_count,
            tick_unit_ns: self.tick_unit_ns,
        }
    }

    /// Reset all metrics to initial state.
    pub fn reset(&mut self) {
        self.samples.fill(0);
        self.write_pos = 0;
        self.sample_count = 0;
        self.total_intervals = 0;
        self.min_ns = u64::MAX;
        self.max_ns = 0;
        self.sum_ns = 0;
        self.late_count = 0;
    }
}

/// Immutable snapshot of tick metrics for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TickMetricsSnapshot {
    /// Intervals recorded.
    pub total_intervals: u64,
    /// Shortest interval in nanoseconds.
    pub min_ns: Option<u64>,
    /// Longest interval in nanoseconds.
    pub max_ns: Option<u64>,
    /// Mean interval in nanoseconds.
    pub mean_ns: Option<u64>,
    /// Late intervals.
    pub late_count: u64,
    /// Samples in the ring buffer.
    pub sample_count: usize,
    /// Configured tick unit in nanoseconds.
    pub tick_unit_ns: u64,
}

impl TickMetricsSnapshot {
    /// Jitter (max - min) in nanoseconds.
    #[must_use]
    pub fn jitter_ns(&self) -> Option<u64> {
        match (self.min_ns, self.max_ns) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }
}
