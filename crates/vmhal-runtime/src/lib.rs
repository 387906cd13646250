#![doc = "Hardware abstraction layer for a tick-driven VM scheduler."]
//!
//! A [`Hal`] provides the logical tick clock, the preemption gate that
//! defers tick notifications, the critical section shared with the tick
//! delivery path, a non-spinning idle wait, and a byte sink for output.
//! The tick source is a [`TickDriver`] chosen once at initialization.

pub mod clock;
pub mod critical;
pub mod driver;
pub mod gate;
pub mod hal;
pub mod idle;
pub mod notify;
pub mod realtime;
pub mod shared;
pub mod sink;
pub mod timeslice;

pub use clock::LogicalClock;
pub use critical::{CriticalGuard, CriticalSection};
pub use driver::{driver_for, CooperativeTicks, ExternalTicks, IntervalTimer, TickDriver};
pub use gate::{PreemptionGate, Route};
pub use hal::{Hal, HalBuilder, HalStats, TickPort};
pub use idle::IdleOutcome;
pub use notify::{TickEvent, TickEvents};
pub use realtime::*;
pub use shared::HalCore;
pub use sink::{write_all, ByteSink, CaptureSink, StdoutSink};
pub use timeslice::{TimesliceExpired, TimesliceMonitor};
