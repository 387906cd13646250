//! Tick source strategies.
//!
//! A [`TickDriver`] decides where ticks come from and what idling means:
//!
//! - [`IntervalTimer`]: a HAL-owned thread fires every `tick_unit` and
//!   delivers ticks asynchronously.
//! - [`ExternalTicks`]: asynchronous delivery from outside the HAL (a
//!   board ISR or a test harness calling `deliver_tick`).
//! - [`CooperativeTicks`]: no asynchronous delivery; idle sleeps one
//!   tick unit and advances the clock.
//!
//! The strategy is picked once at initialization, so the tick path never
//! branches on the mode.

use crate::idle::{self, IdleOutcome};
use crate::realtime;
use crate::shared::HalCore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use vmhal_common::config::{TickMode, TimerThreadConfig};
use vmhal_common::error::{HalError, HalResult};

/// Where ticks come from.
pub trait TickDriver: Send {
    /// Mode this driver implements.
    fn mode(&self) -> TickMode;

    /// Start delivering ticks into `core`.
    ///
    /// # Errors
    ///
    /// `InitializationFailure` if the time base cannot be armed.
    fn arm(&mut self, core: &Arc<HalCore>) -> HalResult<()>;

    /// Stop delivering ticks. Must be safe to call when not armed.
    fn disarm(&mut self);

    /// Give up the CPU until there may be work again.
    fn idle(&self, core: &HalCore) -> IdleOutcome {
        core.wait_for_tick()
    }
}

/// Build the stock driver for `mode`.
#[must_use]
pub fn driver_for(mode: TickMode) -> Box<dyn TickDriver> {
    match mode {
        TickMode::Interrupt => Box::new(IntervalTimer::new()),
        TickMode::External => Box::new(ExternalTicks),
        TickMode::Cooperative => Box::new(CooperativeTicks),
    }
}

/// Interval timer thread delivering one tick per `tick_unit`.
#[derive(Debug, Default)]
pub struct IntervalTimer {
    handle: Option<JoinHandle<()>>,
    stop_requested: Arc<AtomicBool>,
}

impl IntervalTimer {
    /// Create a disarmed timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the timer thread is running.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl TickDriver for IntervalTimer {
    fn mode(&self) -> TickMode {
        TickMode::Interrupt
    }

    fn arm(&mut self, core: &Arc<HalCore>) -> HalResult<()> {
        if self.handle.is_some() {
            return Err(HalError::AlreadyInitialized);
        }

        let period = core.config().tick_unit;
        let thread_config = core.config().timer_thread.clone();
        info!(tick_unit_us = period.as_micros(), "Arming tick timer");

        self.stop_requested.store(false, Ordering::Release);
        let stop = Arc::clone(&self.stop_requested);
        let core = Arc::clone(core);
        let (ready_tx, ready_rx) = mpsc::channel::<HalResult<()>>();

        let handle = thread::Builder::new()
            .name("vmhal-tick".into())
            .spawn(move || {
                if let Err(e) = prepare_timer_thread(&thread_config) {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                drop(ready_tx);
                run_timer(&core, period, &stop);
            })
            .map_err(|e| {
                HalError::InitializationFailure(format!("failed to spawn tick timer thread: {e}"))
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.handle = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(HalError::InitializationFailure(
                    "tick timer thread exited during start-up".into(),
                ))
            }
        }
    }

    fn disarm(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        info!("Disarming tick timer");
        self.stop_requested.store(true, Ordering::Release);
        // The thread notices within one tick unit
        if let Err(e) = handle.join() {
            warn!("Tick timer thread panicked: {:?}", e);
        }
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

fn prepare_timer_thread(config: &TimerThreadConfig) -> HalResult<()> {
    if !config.realtime {
        return Ok(());
    }
    match realtime::promote_current_thread(config.priority) {
        Ok(_) => Ok(()),
        Err(e) if config.fail_fast => Err(e),
        Err(e) => {
            warn!("{e}; tick timer continues at normal priority");
            Ok(())
        }
    }
}

/// Timer loop: absolute deadlines so sleep overshoot does not accumulate.
fn run_timer(core: &HalCore, period: Duration, stop: &AtomicBool) {
    debug!("Tick timer thread started");
    let mut last = Instant::now();
    let mut next = last + period;

    while !stop.load(Ordering::Acquire) {
        idle::sleep_until(next);
        if stop.load(Ordering::Acquire) {
            break;
        }

        let fired = Instant::now();
        core.deliver_tick();
        core.record_interval(fired - last);
        last = fired;

        next += period;
        if fired > next {
            // More than a whole period late: one tick per firing, no catch-up burst
            debug!(
                behind_us = (fired - next).as_micros(),
                "Tick timer fell behind, resynchronizing"
            );
            next = fired + period;
        }
    }
    debug!("Tick timer thread stopped");
}

/// Ticks arrive from outside the HAL through `deliver_tick`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExternalTicks;

impl TickDriver for ExternalTicks {
    fn mode(&self) -> TickMode {
        TickMode::External
    }

    fn arm(&mut self, _core: &Arc<HalCore>) -> HalResult<()> {
        debug!("External tick source: nothing to arm");
        Ok(())
    }

    fn disarm(&mut self) {}
}

/// No asynchronous delivery: idle advances the clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct CooperativeTicks;

impl TickDriver for CooperativeTicks {
    fn mode(&self) -> TickMode {
        TickMode::Cooperative
    }

    fn arm(&mut self, _core: &Arc<HalCore>) -> HalResult<()> {
        debug!("Cooperative tick source: clock advances at idle");
        Ok(())
    }

    fn disarm(&mut self) {}

    fn idle(&self, core: &HalCore) -> IdleOutcome {
        core.sleep_and_advance()
    }
}
