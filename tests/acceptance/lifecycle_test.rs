//! Initialization and configuration acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - `initialize()` succeeds once and reports a second call
//! - A tick source that cannot be armed leaves the HAL uninitialized
//! - Configuration files load and invalid values are rejected

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use vmhal_common::config::{HalConfig, TickMode};
use vmhal_common::error::{HalError, HalResult};
use vmhal_common::state::HalState;
use vmhal_common::time::Tick;
use vmhal_runtime::{CaptureSink, Hal, HalCore, TickDriver};

/// A time base that is never available.
struct UnavailableTimer;

impl TickDriver for UnavailableTimer {
    fn mode(&self) -> TickMode {
        TickMode::Interrupt
    }

    fn arm(&mut self, _core: &Arc<HalCore>) -> HalResult<()> {
        Err(HalError::InitializationFailure(
            "interval timer unavailable".into(),
        ))
    }

    fn disarm(&mut self) {}
}

#[test]
fn test_second_initialize_fails() {
    let mut hal = Hal::builder()
        .mode(TickMode::External)
        .sink(CaptureSink::new())
        .build()
        .unwrap();
    assert_eq!(hal.state(), HalState::Uninitialized);
    hal.initialize().unwrap();
    assert_eq!(hal.initialize(), Err(HalError::AlreadyInitialized));
    assert!(!hal.preemption_enabled(), "preemption starts disabled");
}

#[test]
fn test_arm_failure_leaves_hal_uninitialized() {
    let mut hal = Hal::builder()
        .driver(Box::new(UnavailableTimer))
        .sink(CaptureSink::new())
        .build()
        .unwrap();

    let err = hal.initialize().unwrap_err();
    assert!(matches!(err, HalError::InitializationFailure(_)));
    assert!(err.is_fatal());
    assert_eq!(hal.state(), HalState::Uninitialized);
    assert_eq!(hal.enable_preemption(), Err(HalError::NotInitialized));
}

#[test]
fn test_interrupt_mode_initializes_and_shuts_down() {
    let mut hal = Hal::builder()
        .mode(TickMode::Interrupt)
        .tick_unit(Duration::from_millis(2))
        .sink(CaptureSink::new())
        .build()
        .unwrap();
    hal.initialize().unwrap();
    hal.shutdown().unwrap();
    assert_eq!(hal.state(), HalState::ShutDown);
    assert!(matches!(
        hal.shutdown(),
        Err(HalError::InvalidStateTransition { .. })
    ));

    // Re-arming after shutdown keeps the clock
    let before = hal.now();
    hal.initialize().unwrap();
    hal.shutdown().unwrap();
    assert!(hal.now() >= before);
}

#[test]
fn test_config_file_drives_hal() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "tick_unit = \"10ms\"\ntimeslice_tick_count = 5\nmode = \"external\"\nlock_failure = \"fatal\""
    )
    .unwrap();

    let config = HalConfig::from_file(file.path()).unwrap();
    let mut hal = Hal::builder()
        .config(config)
        .sink(CaptureSink::new())
        .build()
        .unwrap();
    hal.initialize().unwrap();

    assert_eq!(hal.mode(), TickMode::External);
    assert_eq!(hal.config().tick_unit, Duration::from_millis(10));
    assert_eq!(hal.config().timeslice(), Duration::from_millis(50));
    assert_eq!(hal.deliver_tick(), Tick(1));
}

#[test]
fn test_invalid_configuration_rejected() {
    let zero_tick = Hal::builder()
        .tick_unit(Duration::ZERO)
        .sink(CaptureSink::new())
        .build();
    assert!(matches!(zero_tick, Err(HalError::Config(_))));

    assert!(HalConfig::from_toml("timeslice_tick_count = \"three\"").is_err());
}

#[test]
fn test_stats_track_delivery() {
    let mut hal = Hal::builder()
        .mode(TickMode::External)
        .sink(CaptureSink::new())
        .build()
        .unwrap();
    hal.initialize().unwrap();

    // Closed gate from initialization: three deferred ticks
    for _ in 0..3 {
        hal.deliver_tick();
    }
    hal.enable_preemption().unwrap();
    hal.deliver_tick();

    let stats = hal.stats();
    assert_eq!(stats.clock, 4);
    assert_eq!(stats.events_posted, 2);
    assert_eq!(stats.batched_events, 1);
    assert_eq!(stats.deferred_ticks, 0);
}
