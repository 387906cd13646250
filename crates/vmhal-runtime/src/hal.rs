//! The HAL handle consumed by the VM scheduler.
//!
//! `Hal` bundles the tick source, preemption gate, critical section,
//! idle wait, and byte sink behind one explicitly owned handle. The
//! scheduler owns the `Hal`; asynchronous tick sources get a
//! [`TickPort`] or an `Arc<HalCore>`.

use crate::critical::CriticalGuard;
use crate::driver::{driver_for, TickDriver};
use crate::idle::IdleOutcome;
use crate::notify::{TickEvent, TickEvents};
use crate::shared::HalCore;
use crate::sink::{self, ByteSink, StdoutSink};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vmhal_common::config::{HalConfig, TickMode};
use vmhal_common::error::{HalError, HalResult};
use vmhal_common::metrics::TickMetricsSnapshot;
use vmhal_common::state::{HalState, Lifecycle};
use vmhal_common::time::Tick;

/// Counters describing tick delivery so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HalStats {
    /// Current logical clock value.
    pub clock: u64,
    /// Notifications posted to the scheduler.
    pub events_posted: u64,
    /// Batched notifications posted when preemption was re-enabled.
    pub batched_events: u64,
    /// Notifications coalesced because the channel was full.
    pub coalesced_notifications: u64,
    /// Ticks from coalesced notifications not yet carried by a posted event.
    pub unannounced_ticks: u64,
    /// Ticks delivered while preemption was disabled and not yet announced.
    pub deferred_ticks: u64,
    /// Critical section primitive failures.
    pub lock_failures: u64,
}

/// Handle to the hardware abstraction layer.
pub struct Hal {
    core: Arc<HalCore>,
    events: TickEvents,
    driver: Box<dyn TickDriver>,
    lifecycle: Lifecycle,
}

impl fmt::Debug for Hal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hal")
            .field("state", &self.lifecycle.state())
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl Hal {
    /// HAL on standard output with the stock driver for `config.mode`.
    ///
    /// # Errors
    ///
    /// `HalError::Config` if the configuration is invalid.
    pub fn new(config: HalConfig) -> HalResult<Self> {
        HalBuilder::new().config(config).build()
    }

    /// Start building a HAL.
    #[must_use]
    pub fn builder() -> HalBuilder {
        HalBuilder::new()
    }

    /// Arm the tick source. Must run once before the scheduler starts.
    ///
    /// Preemption stays disabled until [`Hal::enable_preemption`].
    ///
    /// # Errors
    ///
    /// `AlreadyInitialized` on a second call without `shutdown()`,
    /// `InitializationFailure` if the time base cannot be armed.
    pub fn initialize(&mut self) -> HalResult<()> {
        if self.lifecycle.state() == HalState::Ready {
            return Err(HalError::AlreadyInitialized);
        }
        info!(
            mode = %self.driver.mode(),
            tick_unit_us = self.core.config().tick_unit.as_micros(),
            timeslice_tick_count = self.core.config().timeslice_tick_count,
            "Initializing HAL"
        );

        if let Err(e) = self.driver.arm(&self.core) {
            error!("Tick source failed to arm: {e}");
            return Err(match e {
                HalError::InitializationFailure(_) => e,
                other => HalError::InitializationFailure(other.to_string()),
            });
        }

        self.lifecycle.transition(HalState::Ready)?;
        info!("HAL ready, preemption disabled");
        Ok(())
    }

    /// Disarm the tick source. A later `initialize()` is allowed.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` if the HAL is not running.
    pub fn shutdown(&mut self) -> HalResult<()> {
        self.lifecycle.transition(HalState::ShutDown)?;
        self.driver.disarm();
        self.core.reset_gate()?;
        self.core.wake();
        info!(clock = self.now().0, "HAL shut down");
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> HalState {
        self.lifecycle.state()
    }

    /// Active tick mode.
    #[must_use]
    pub fn mode(&self) -> TickMode {
        self.driver.mode()
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &HalConfig {
        self.core.config()
    }

    /// Advance the logical clock by exactly one tick and return the new value.
    pub fn advance_tick(&self) -> Tick {
        self.core.deliver_tick()
    }

    /// Asynchronous tick entry point, for interrupt handlers and harnesses.
    ///
    /// Identical to [`Hal::advance_tick`]; named for the delivery path.
    pub fn deliver_tick(&self) -> Tick {
        self.core.deliver_tick()
    }

    /// A `Send + Sync` handle for delivering ticks from another thread.
    #[must_use]
    pub fn tick_port(&self) -> TickPort {
        TickPort {
            core: Arc::clone(&self.core),
        }
    }

    /// Current logical clock reading.
    #[must_use]
    pub fn now(&self) -> Tick {
        self.core.now()
    }

    /// Allow asynchronous tick delivery. Deferred ticks are announced as
    /// one batched event. No-op if already enabled.
    ///
    /// # Errors
    ///
    /// `NotInitialized` before `initialize()`, `LockFailure` under the
    /// fatal lock policy.
    pub fn enable_preemption(&self) -> HalResult<()> {
        self.require_ready()?;
        self.core.open_gate()?;
        debug!("Preemption enabled");
        Ok(())
    }

    /// Suppress asynchronous tick delivery. Ticks keep counting.
    ///
    /// # Errors
    ///
    /// `NotInitialized` before `initialize()`, `LockFailure` under the
    /// fatal lock policy.
    pub fn disable_preemption(&self) -> HalResult<()> {
        self.require_ready()?;
        self.core.close_gate()?;
        debug!("Preemption disabled");
        Ok(())
    }

    /// Whether ticks are announced as they arrive.
    #[must_use]
    pub fn preemption_enabled(&self) -> bool {
        self.core.gate().is_open()
    }

    /// Run `f` with preemption disabled, restoring the previous state.
    ///
    /// Preemption is restored even if `f` panics.
    ///
    /// # Errors
    ///
    /// Errors from disabling or re-enabling preemption.
    pub fn without_preemption<R>(&self, f: impl FnOnce() -> R) -> HalResult<R> {
        let was_enabled = self.preemption_enabled();
        self.disable_preemption()?;
        let mut restore = PreemptionRestore {
            hal: self,
            armed: was_enabled,
        };
        let result = f();
        if restore.armed {
            restore.armed = false;
            self.enable_preemption()?;
        }
        Ok(result)
    }

    /// Block until this path holds the critical section.
    ///
    /// Pair with [`Hal::release_critical_section`] on every exit path, or
    /// use [`Hal::critical_section`] for a scoped guard.
    ///
    /// # Errors
    ///
    /// `LockFailure` under the fatal lock policy.
    pub fn acquire_critical_section(&self) -> HalResult<()> {
        self.core.lock().acquire()
    }

    /// Release the critical section.
    ///
    /// # Errors
    ///
    /// `LockFailure` under the fatal lock policy.
    pub fn release_critical_section(&self) -> HalResult<()> {
        self.core.lock().release()
    }

    /// Scoped critical section, released when the guard drops.
    ///
    /// # Errors
    ///
    /// `LockFailure` under the fatal lock policy.
    pub fn critical_section(&self) -> HalResult<CriticalGuard<'_>> {
        self.core.lock().enter()
    }

    /// Give up the CPU while nothing is runnable.
    ///
    /// Returns within about one tick unit. Every outcome is normal control
    /// flow: re-check the ready queue and idle again if still empty.
    pub fn idle_wait(&self) -> IdleOutcome {
        self.driver.idle(&self.core)
    }

    /// Wake an idle wait without delivering a tick (asynchronous modes).
    pub fn wake(&self) {
        self.core.wake();
    }

    /// Next pending tick notification, if any.
    #[must_use]
    pub fn try_next_event(&self) -> Option<TickEvent> {
        self.events.try_next()
    }

    /// The notification receiver.
    #[must_use]
    pub fn events(&self) -> &TickEvents {
        &self.events
    }

    /// Write bytes to the output channel. May write fewer than requested.
    ///
    /// # Errors
    ///
    /// `SinkWriteFailure` from the channel.
    pub fn write(&self, bytes: &[u8]) -> HalResult<usize> {
        self.core.sink().write(bytes)
    }

    /// Write the whole buffer, looping over short writes.
    ///
    /// # Errors
    ///
    /// `SinkWriteFailure` from the channel.
    pub fn write_all(&self, bytes: &[u8]) -> HalResult<()> {
        sink::write_all(self.core.sink(), bytes)
    }

    /// Flush the output channel.
    ///
    /// # Errors
    ///
    /// `SinkFlushFailure` from the channel.
    pub fn flush(&self) -> HalResult<()> {
        self.core.sink().flush()
    }

    /// Delivery counters.
    #[must_use]
    pub fn stats(&self) -> HalStats {
        HalStats {
            clock: self.now().0,
            events_posted: self.core.posted(),
            batched_events: self.core.batches(),
            coalesced_notifications: self.core.coalesced(),
            unannounced_ticks: self.core.unannounced(),
            deferred_ticks: self.core.gate().deferred(),
            lock_failures: self.core.lock().failure_count(),
        }
    }

    /// Inter-tick interval statistics, when metrics are enabled.
    #[must_use]
    pub fn tick_metrics(&self) -> Option<TickMetricsSnapshot> {
        self.core.metrics_snapshot()
    }

    fn require_ready(&self) -> HalResult<()> {
        if self.lifecycle.state().is_ready() {
            Ok(())
        } else {
            Err(HalError::NotInitialized)
        }
    }
}

impl Drop for Hal {
    fn drop(&mut self) {
        self.driver.disarm();
    }
}

/// Cloneable tick delivery handle for interrupt sources on other threads.
#[derive(Debug, Clone)]
pub struct TickPort {
    core: Arc<HalCore>,
}

impl TickPort {
    /// Deliver one tick. See [`HalCore::deliver_tick`].
    pub fn deliver_tick(&self) -> Tick {
        self.core.deliver_tick()
    }

    /// Current logical clock reading.
    #[must_use]
    pub fn now(&self) -> Tick {
        self.core.now()
    }

    /// Wake an idle wait without delivering a tick.
    pub fn wake(&self) {
        self.core.wake();
    }
}

/// Builder for configuring the HAL.
pub struct HalBuilder {
    config: HalConfig,
    sink: Option<Arc<dyn ByteSink>>,
    driver: Option<Box<dyn TickDriver>>,
}

impl Default for HalBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HalBuilder {
    /// Builder with default configuration on standard output.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: HalConfig::default(),
            sink: None,
            driver: None,
        }
    }

    /// Set the full configuration.
    #[must_use]
    pub fn config(mut self, config: HalConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the tick period.
    #[must_use]
    pub fn tick_unit(mut self, tick_unit: std::time::Duration) -> Self {
        self.config.tick_unit = tick_unit;
        self
    }

    /// Set the number of ticks per timeslice.
    #[must_use]
    pub fn timeslice_tick_count(mut self, count: u32) -> Self {
        self.config.timeslice_tick_count = count;
        self
    }

    /// Select the tick mode (and its stock driver).
    #[must_use]
    pub fn mode(mut self, mode: TickMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Use `sink` as the output channel instead of standard output.
    #[must_use]
    pub fn sink(mut self, sink: impl ByteSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Use a custom tick driver; its mode overrides `config.mode`.
    #[must_use]
    pub fn driver(mut self, driver: Box<dyn TickDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Build the HAL. It still needs `initialize()`.
    ///
    /// # Errors
    ///
    /// `HalError::Config` if the configuration is invalid.
    pub fn build(self) -> HalResult<Hal> {
        let mut config = self.config;
        let driver = self.driver.unwrap_or_else(|| driver_for(config.mode));
        config.mode = driver.mode();
        config.validate()?;

        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(StdoutSink::new()) as Arc<dyn ByteSink>);
        let (core, events) = HalCore::new(config, sink);

        Ok(Hal {
            core: Arc::new(core),
            events,
            driver,
            lifecycle: Lifecycle::new(),
        })
    }
}

/// Re-enables preemption when a `without_preemption` body unwinds.
struct PreemptionRestore<'a> {
    hal: &'a Hal,
    armed: bool,
}

impl Drop for PreemptionRestore<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.hal.enable_preemption() {
                warn!("Failed to restore preemption: {e}");
            }
        }
    }
}
