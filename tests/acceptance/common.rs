//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - Building an initialized HAL per tick mode
//! - Measuring per-thread CPU time

#![allow(dead_code)] // Not every test module uses every helper

use std::time::Duration;
use vmhal_common::config::{HalConfig, TickMode};
use vmhal_runtime::{CaptureSink, Hal};

/// Build, initialize, and enable preemption on a HAL writing to `sink`.
pub fn ready_hal(config: HalConfig, sink: &CaptureSink) -> Hal {
    let mut hal = Hal::builder()
        .config(config)
        .sink(sink.clone())
        .build()
        .expect("valid configuration");
    hal.initialize().expect("HAL initializes");
    hal.enable_preemption().expect("preemption enables");
    hal
}

/// Configuration for `mode` with the given tick unit and slice length.
pub fn config(mode: TickMode, tick_unit: Duration, timeslice_tick_count: u32) -> HalConfig {
    HalConfig {
        mode,
        tick_unit,
        timeslice_tick_count,
        ..Default::default()
    }
}

/// Externally ticked HAL: the test is the interrupt source.
pub fn external_hal(timeslice_tick_count: u32) -> (Hal, CaptureSink) {
    let sink = CaptureSink::new();
    let hal = ready_hal(
        config(TickMode::External, Duration::from_millis(4), timeslice_tick_count),
        &sink,
    );
    (hal, sink)
}

/// Cooperative HAL with a short tick unit.
pub fn cooperative_hal(tick_unit: Duration) -> (Hal, CaptureSink) {
    let sink = CaptureSink::new();
    let hal = ready_hal(config(TickMode::Cooperative, tick_unit, 3), &sink);
    (hal, sink)
}

/// CPU time consumed so far by the calling thread.
pub fn thread_cpu_time() -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid out-pointer for the duration of the call
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    assert_eq!(rc, 0, "clock_gettime(CLOCK_THREAD_CPUTIME_ID) failed");
    Duration::new(
        u64::try_from(ts.tv_sec).unwrap_or(0),
        u32::try_from(ts.tv_nsec).unwrap_or(0),
    )
}
