//! State shared between the scheduler path and the tick delivery path.

use crate::clock::LogicalClock;
use crate::critical::CriticalSection;
use crate::gate::{PreemptionGate, Route};
use crate::idle::{self, IdleOutcome};
use crate::notify::{self, TickEvent, TickEvents, TickNotifier, WakeSignal};
use crate::sink::ByteSink;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, trace, warn};
use vmhal_common::config::HalConfig;
use vmhal_common::error::HalResult;
use vmhal_common::metrics::{TickMetrics, TickMetricsSnapshot};
use vmhal_common::time::Tick;

/// Clock, gate, lock, and notification plumbing behind a `Hal`.
///
/// Tick drivers receive an `Arc<HalCore>` when armed and call
/// [`HalCore::deliver_tick`] from their delivery path.
pub struct HalCore {
    config: HalConfig,
    clock: LogicalClock,
    gate: PreemptionGate,
    lock: CriticalSection,
    notifier: TickNotifier,
    wake: WakeSignal,
    metrics: Option<Mutex<TickMetrics>>,
    sink: Arc<dyn ByteSink>,
    batches: AtomicU64,
}

impl fmt::Debug for HalCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HalCore")
            .field("mode", &self.config.mode)
            .field("clock", &self.clock.now())
            .field("gate", &self.gate)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl HalCore {
    /// Build the core for `config`; the gate and lock variants follow
    /// `config.mode`.
    pub(crate) fn new(config: HalConfig, sink: Arc<dyn ByteSink>) -> (Self, TickEvents) {
        let (notifier, events) = notify::channel(config.notify_capacity);
        let asynchronous = config.mode.is_asynchronous();
        let lock = if asynchronous {
            CriticalSection::new(config.lock_failure, Arc::clone(&sink))
        } else {
            CriticalSection::noop(Arc::clone(&sink))
        };
        let gate = if asynchronous {
            PreemptionGate::new()
        } else {
            PreemptionGate::always_open()
        };
        let metrics = config
            .metrics
            .enabled
            .then(|| Mutex::new(TickMetrics::new(config.metrics.histogram_size, config.tick_unit)));

        let core = Self {
            config,
            clock: LogicalClock::new(),
            gate,
            lock,
            notifier,
            wake: WakeSignal::default(),
            metrics,
            sink,
            batches: AtomicU64::new(0),
        };
        (core, events)
    }

    /// Configuration the core was built with.
    #[must_use]
    pub fn config(&self) -> &HalConfig {
        &self.config
    }

    /// Current logical clock reading.
    #[must_use]
    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    /// Deliver one tick: advance the clock by exactly one, announce or
    /// defer it according to the preemption gate, and wake idle waiters.
    ///
    /// Safe to call from any thread. Never blocks longer than the current
    /// critical section holder keeps the lock.
    pub fn deliver_tick(&self) -> Tick {
        let tick = match self.lock.enter() {
            Ok(cs) => {
                let tick = self.clock.advance();
                match self.gate.route(&cs) {
                    Route::Deliver { ticks } => {
                        self.notifier.post(TickEvent::live(tick, ticks));
                    }
                    Route::Deferred { pending } => {
                        trace!(tick = tick.0, pending, "Tick deferred, preemption disabled");
                    }
                }
                tick
            }
            Err(e) => {
                // Fatal policy, but the delivery path has nobody to return to.
                // Count the tick and defer its announcement.
                let tick = self.clock.advance();
                let pending = self.gate.defer_unguarded();
                warn!(tick = tick.0, pending, "Tick delivered without critical section: {e}");
                tick
            }
        };
        self.wake.notify();
        tick
    }

    /// Open the gate, posting one batched event for any deferred ticks.
    pub(crate) fn open_gate(&self) -> HalResult<()> {
        let cs = self.lock.enter()?;
        if let Some(pending) = self.gate.open(&cs) {
            let tick = self.clock.now();
            self.batches.fetch_add(1, Ordering::Relaxed);
            debug!(tick = tick.0, pending, "Delivering deferred ticks");
            self.notifier.post(TickEvent::batch(tick, pending));
        }
        Ok(())
    }

    pub(crate) fn close_gate(&self) -> HalResult<()> {
        let cs = self.lock.enter()?;
        self.gate.close(&cs);
        Ok(())
    }

    /// Close the gate and drop deferred ticks when the HAL shuts down.
    pub(crate) fn reset_gate(&self) -> HalResult<u64> {
        let cs = self.lock.enter()?;
        let dropped = self.gate.reset(&cs);
        if dropped > 0 {
            debug!(dropped, "Deferred ticks discarded at shutdown");
        }
        Ok(dropped)
    }

    pub(crate) fn gate(&self) -> &PreemptionGate {
        &self.gate
    }

    pub(crate) fn lock(&self) -> &CriticalSection {
        &self.lock
    }

    pub(crate) fn sink(&self) -> &dyn ByteSink {
        self.sink.as_ref()
    }

    /// Record the measured distance between two ticks.
    pub fn record_interval(&self, interval: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(interval);
        }
    }

    pub(crate) fn metrics_snapshot(&self) -> Option<TickMetricsSnapshot> {
        self.metrics
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner).snapshot())
    }

    /// Wake idle waiters without delivering a tick.
    pub fn wake(&self) {
        self.wake.notify();
    }

    /// Park until the next tick or wake, at most one tick unit.
    pub fn wait_for_tick(&self) -> IdleOutcome {
        if self.lock.held_by_current() {
            warn!("Idle wait entered while holding the critical section");
        }
        // Sequence first: a tick landing between the two reads ends the wait at once
        let seen = self.wake.current();
        let before = self.clock.now();
        let woken = self.wake.wait_past(seen, self.config.tick_unit);
        let now = self.clock.now();
        if now > before {
            IdleOutcome::Tick(now)
        } else if woken {
            IdleOutcome::Woken
        } else {
            IdleOutcome::Spurious
        }
    }

    /// Sleep one tick unit, then advance the clock.
    pub fn sleep_and_advance(&self) -> IdleOutcome {
        idle::sleep_for(self.config.tick_unit);
        IdleOutcome::Tick(self.deliver_tick())
    }

    pub(crate) fn posted(&self) -> u64 {
        self.notifier.posted()
    }

    pub(crate) fn coalesced(&self) -> u64 {
        self.notifier.coalesced()
    }

    pub(crate) fn unannounced(&self) -> u64 {
        self.notifier.unannounced()
    }

    pub(crate) fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }
}
