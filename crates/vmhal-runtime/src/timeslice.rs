//! Timeslice accounting on the scheduler side.
//!
//! The monitor is the single consumption point for tick notifications:
//! it reads the event's clock value against the start of the current
//! slice and reports an expiry once `timeslice_tick_count` ticks have
//! elapsed. The slice restarts at the expiring tick.

use crate::hal::Hal;
use crate::notify::TickEvent;
use tracing::trace;
use vmhal_common::config::HalConfig;
use vmhal_common::time::Tick;

/// A timeslice ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimesliceExpired {
    /// Clock value at which the expiry was observed.
    pub tick: Tick,
    /// Ticks the expired slice actually lasted (at least the configured count).
    pub elapsed: u64,
    /// 1-based sequence number of this expiry.
    pub sequence: u64,
    /// Whether the expiry was found while processing deferred ticks.
    pub batched: bool,
}

/// Tracks the running slice and turns tick events into expiries.
#[derive(Debug, Clone)]
pub struct TimesliceMonitor {
    ticks_per_slice: u64,
    slice_start: Tick,
    expiries: u64,
    checks: u64,
}

impl TimesliceMonitor {
    /// Monitor for slices of `timeslice_tick_count` ticks starting at tick zero.
    #[must_use]
    pub fn new(timeslice_tick_count: u32) -> Self {
        Self {
            ticks_per_slice: u64::from(timeslice_tick_count.max(1)),
            slice_start: Tick::ZERO,
            expiries: 0,
            checks: 0,
        }
    }

    /// Monitor sized from the HAL configuration.
    #[must_use]
    pub fn from_config(config: &HalConfig) -> Self {
        Self::new(config.timeslice_tick_count)
    }

    /// Start a fresh slice at `now`, e.g. after switching tasks.
    pub fn restart(&mut self, now: Tick) {
        self.slice_start = now;
    }

    /// Ticks elapsed in the current slice at `now`.
    #[must_use]
    pub fn elapsed(&self, now: Tick) -> u64 {
        now.since(self.slice_start)
    }

    /// Evaluate one notification.
    pub fn observe(&mut self, event: TickEvent) -> Option<TimesliceExpired> {
        self.checks += 1;
        let elapsed = event.tick.since(self.slice_start);
        if elapsed < self.ticks_per_slice {
            return None;
        }
        self.expiries += 1;
        self.slice_start = event.tick;
        trace!(tick = event.tick.0, elapsed, "Timeslice expired");
        Some(TimesliceExpired {
            tick: event.tick,
            elapsed,
            sequence: self.expiries,
            batched: event.is_batched(),
        })
    }

    /// Drain every pending notification from `hal`, returning the expiries
    /// in delivery order.
    pub fn poll(&mut self, hal: &Hal) -> Vec<TimesliceExpired> {
        hal.events()
            .drain()
            .filter_map(|event| self.observe(event))
            .collect()
    }

    /// Expiries reported so far.
    #[must_use]
    pub fn expiries(&self) -> u64 {
        self.expiries
    }

    /// Notifications evaluated so far.
    #[must_use]
    pub fn checks(&self) -> u64 {
        self.checks
    }
}
