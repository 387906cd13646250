//! Timeslice expiry acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - With 3 ticks per slice, 30 ticks produce 10 expiries in order
//! - A disabled window of K ticks is seen as one batched check on re-enable
//! - Cooperative idling produces the same expiries as interrupt delivery

use super::common::{cooperative_hal, external_hal};
use std::time::Duration;
use vmhal_common::time::Tick;
use vmhal_runtime::{TimesliceExpired, TimesliceMonitor};

#[test]
fn test_thirty_ticks_ten_expiries() {
    let (hal, _sink) = external_hal(3);
    assert_eq!(hal.config().tick_unit, Duration::from_millis(4));
    let mut monitor = TimesliceMonitor::from_config(hal.config());

    let mut expiries: Vec<TimesliceExpired> = Vec::new();
    for _ in 0..30 {
        hal.deliver_tick();
        expiries.extend(monitor.poll(&hal));
    }

    assert_eq!(expiries.len(), 10);
    for (i, expiry) in (1u64..).zip(&expiries) {
        assert_eq!(expiry.sequence, i);
        assert_eq!(expiry.tick, Tick(3 * i));
        assert_eq!(expiry.elapsed, 3);
        assert!(!expiry.batched);
    }
    assert_eq!(monitor.checks(), 30);
}

#[test]
fn test_polling_late_sees_every_expiry() {
    let (hal, _sink) = external_hal(3);
    let mut monitor = TimesliceMonitor::from_config(hal.config());

    for _ in 0..30 {
        hal.deliver_tick();
    }
    let ticks: Vec<u64> = monitor.poll(&hal).iter().map(|e| e.tick.0).collect();
    assert_eq!(ticks, (1..=10).map(|i| i * 3).collect::<Vec<_>>());
}

#[test]
fn test_disabled_window_batched_check() {
    let (hal, _sink) = external_hal(3);
    let mut monitor = TimesliceMonitor::from_config(hal.config());
    let before = hal.now();

    hal.disable_preemption().unwrap();
    for _ in 0..5 {
        hal.deliver_tick();
    }
    assert!(monitor.poll(&hal).is_empty());
    assert_eq!(monitor.checks(), 0);

    hal.enable_preemption().unwrap();
    assert_eq!(hal.now().since(before), 5);

    let expiries = monitor.poll(&hal);
    assert_eq!(monitor.checks(), 1);
    assert_eq!(expiries.len(), 1);
    assert!(expiries[0].batched);
    assert_eq!(expiries[0].elapsed, 5);
    assert_eq!(hal.stats().batched_events, 1);
}

#[test]
fn test_short_disabled_window_does_not_expire() {
    let (hal, _sink) = external_hal(6);
    let mut monitor = TimesliceMonitor::from_config(hal.config());

    hal.without_preemption(|| {
        for _ in 0..5 {
            hal.deliver_tick();
        }
    })
    .unwrap();

    assert!(monitor.poll(&hal).is_empty());
    assert_eq!(monitor.checks(), 1);
    assert_eq!(monitor.elapsed(hal.now()), 5);

    hal.deliver_tick();
    assert_eq!(monitor.poll(&hal).len(), 1);
}

#[test]
fn test_enable_twice_is_noop() {
    let (hal, _sink) = external_hal(3);
    hal.disable_preemption().unwrap();
    hal.deliver_tick();
    hal.enable_preemption().unwrap();
    hal.enable_preemption().unwrap();
    assert_eq!(hal.events().drain().count(), 1);
    assert_eq!(hal.stats().batched_events, 1);
}

#[test]
fn test_cooperative_idle_expiries() {
    let (hal, _sink) = cooperative_hal(Duration::from_millis(1));
    let mut monitor = TimesliceMonitor::from_config(hal.config());

    let mut expiries = Vec::new();
    for _ in 0..9 {
        assert!(hal.idle_wait().ticked());
        expiries.extend(monitor.poll(&hal));
    }
    let ticks: Vec<u64> = expiries.iter().map(|e| e.tick.0).collect();
    assert_eq!(ticks, vec![3, 6, 9]);
}
