//! Logical clock acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - N tick deliveries advance the clock by exactly N in every mode
//! - Concurrent deliveries are never lost and notifications stay ordered
//! - The interval timer delivers roughly one tick per tick unit

use super::common::{config, cooperative_hal, external_hal, ready_hal};
use proptest::prelude::*;
use std::thread;
use std::time::{Duration, Instant};
use vmhal_common::config::TickMode;
use vmhal_common::time::Tick;
use vmhal_runtime::CaptureSink;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_external_deliveries_add_exactly_n(n in 0u64..500) {
        let (hal, _sink) = external_hal(3);
        let before = hal.now();
        for _ in 0..n {
            hal.deliver_tick();
        }
        prop_assert_eq!(hal.now().since(before), n);
    }

    #[test]
    fn prop_cooperative_advances_add_exactly_n(n in 0u64..500) {
        let (hal, _sink) = cooperative_hal(Duration::from_millis(1));
        let before = hal.now();
        for _ in 0..n {
            hal.advance_tick();
        }
        prop_assert_eq!(hal.now().since(before), n);
    }

    #[test]
    fn prop_deferred_ticks_still_count(open in 0u64..50, closed in 0u64..100) {
        let (hal, _sink) = external_hal(3);
        for _ in 0..open {
            hal.deliver_tick();
        }
        hal.disable_preemption().unwrap();
        for _ in 0..closed {
            hal.deliver_tick();
        }
        hal.enable_preemption().unwrap();
        prop_assert_eq!(hal.now(), Tick(open + closed));
        let announced: u64 = hal.events().drain().map(|e| e.ticks).sum();
        prop_assert_eq!(announced, open + closed);
    }
}

#[test]
fn test_advance_tick_returns_new_value() {
    let (hal, _sink) = external_hal(3);
    assert_eq!(hal.advance_tick(), Tick(1));
    assert_eq!(hal.deliver_tick(), Tick(2));
    assert_eq!(hal.now(), Tick(2));
}

#[test]
fn test_concurrent_deliveries_are_not_lost() {
    const THREADS: u64 = 4;
    const PER_THREAD: u64 = 1000;

    let sink = CaptureSink::new();
    let mut cfg = config(TickMode::External, Duration::from_millis(4), 3);
    cfg.notify_capacity = usize::try_from(THREADS * PER_THREAD).unwrap();
    let hal = ready_hal(cfg, &sink);

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let port = hal.tick_port();
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    port.deliver_tick();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(hal.now(), Tick(THREADS * PER_THREAD));

    // Each delivery announced once, in clock order
    let ticks: Vec<u64> = hal.events().drain().map(|e| e.tick.0).collect();
    assert_eq!(ticks.len() as u64, THREADS * PER_THREAD);
    assert!(ticks.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(hal.stats().coalesced_notifications, 0);
}

#[test]
fn test_full_channel_coalesces_notifications_not_ticks() {
    let sink = CaptureSink::new();
    let mut cfg = config(TickMode::External, Duration::from_millis(4), 3);
    cfg.notify_capacity = 4;
    let hal = ready_hal(cfg, &sink);

    for _ in 0..20 {
        hal.deliver_tick();
    }
    assert_eq!(hal.now(), Tick(20));
    assert_eq!(hal.events().drain().count(), 4);
    assert_eq!(hal.stats().coalesced_notifications, 16);
    assert_eq!(hal.stats().unannounced_ticks, 16);
}

#[test]
fn test_coalesced_ticks_carried_by_next_event() {
    let sink = CaptureSink::new();
    let mut cfg = config(TickMode::External, Duration::from_millis(4), 3);
    cfg.notify_capacity = 4;
    let hal = ready_hal(cfg, &sink);
    let before = hal.now();

    for _ in 0..20 {
        hal.deliver_tick();
    }
    let mut announced: u64 = hal.events().drain().map(|e| e.ticks).sum();
    hal.deliver_tick();
    let last = hal.try_next_event().unwrap();
    announced += last.ticks;

    assert_eq!(last.tick, Tick(21));
    assert_eq!(last.ticks, 17);
    assert!(!last.is_batched());
    assert_eq!(announced, hal.now().since(before));
    assert_eq!(hal.stats().unannounced_ticks, 0);
}

#[test]
fn test_interval_timer_tick_rate() {
    let sink = CaptureSink::new();
    let hal = ready_hal(
        config(TickMode::Interrupt, Duration::from_millis(4), 3),
        &sink,
    );

    let start = Instant::now();
    thread::sleep(Duration::from_millis(200));
    let elapsed = start.elapsed();
    let ticks = hal.now().0;

    // The timer cannot run ahead of wall time; allow heavy scheduling delay below
    let ceiling = u64::try_from(elapsed.as_millis() / 4).unwrap() + 2;
    assert!(ticks <= ceiling, "{ticks} ticks in {elapsed:?}");
    assert!(ticks >= 10, "only {ticks} ticks in {elapsed:?}");

    let metrics = hal.tick_metrics().expect("metrics enabled by default");
    assert!(metrics.total_intervals > 0);
    assert_eq!(metrics.tick_unit_ns, 4_000_000);
}

#[test]
fn test_interval_timer_stops_on_shutdown() {
    let sink = CaptureSink::new();
    let mut hal = ready_hal(
        config(TickMode::Interrupt, Duration::from_millis(2), 3),
        &sink,
    );
    thread::sleep(Duration::from_millis(20));
    hal.shutdown().unwrap();

    let frozen = hal.now();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(hal.now(), frozen);
}
