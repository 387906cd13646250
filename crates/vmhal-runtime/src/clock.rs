//! The logical clock.
//!
//! A single monotonically increasing tick counter. The increment is one
//! atomic `fetch_add`, so the delivery path never needs more than the
//! counter itself to keep reads on the main path consistent.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};
use vmhal_common::time::Tick;

/// Process-wide tick counter.
#[derive(Debug, Default)]
pub struct LogicalClock {
    // Padded: written from the delivery path, read from the scheduler path.
    ticks: CachePadded<AtomicU64>,
}

impl LogicalClock {
    /// Create a clock reading zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current clock value.
    #[inline]
    pub fn now(&self) -> Tick {
        Tick(self.ticks.load(Ordering::Acquire))
    }

    /// Increment by exactly one and return the new value.
    ///
    /// Only the HAL core calls this; everything else goes through
    /// `Hal::advance_tick` so gate and wake bookkeeping stay in step.
    #[inline]
    pub(crate) fn advance(&self) -> Tick {
        Tick(self.ticks.fetch_add(1, Ordering::AcqRel) + 1)
    }
}
