//! Idle wait and deadline sleeping.
//!
//! Idle never spins. Asynchronous hosts park on the wake signal until
//! the next tick or `wake()`; cooperative hosts sleep one tick unit and
//! advance the clock themselves.

use std::time::{Duration, Instant};
use tracing::{trace, warn};
use vmhal_common::time::Tick;

/// How an idle wait ended. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The clock advanced while idle; carries the new reading.
    Tick(Tick),
    /// An explicit `wake()` arrived before any tick.
    Woken,
    /// Returned early or timed out without a tick. Re-check and idle again.
    Spurious,
}

impl IdleOutcome {
    /// Whether the clock moved during the wait.
    #[must_use]
    pub fn ticked(&self) -> bool {
        matches!(self, Self::Tick(_))
    }
}

/// Sleep until `deadline`, restarting after signal interruptions.
///
/// The deadline is converted once to an absolute CLOCK_MONOTONIC time, so
/// an interrupted sleep resumes towards the same instant.
#[cfg(target_os = "linux")]
pub(crate) fn sleep_until(deadline: Instant) {
    use nix::errno::Errno;
    use nix::sys::time::TimeSpec;
    use nix::time::{clock_gettime, clock_nanosleep, ClockId, ClockNanosleepFlags};

    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return;
    }
    let target = match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(now) => now + TimeSpec::from_duration(remaining),
        Err(e) => {
            warn!("clock_gettime failed: {e}; falling back to thread::sleep");
            std::thread::sleep(remaining);
            return;
        }
    };

    loop {
        match clock_nanosleep(
            ClockId::CLOCK_MONOTONIC,
            ClockNanosleepFlags::TIMER_ABSTIME,
            &target,
        ) {
            Ok(_) => return,
            Err(Errno::EINTR) => {
                trace!("Sleep interrupted by signal, resuming");
            }
            Err(e) => {
                warn!("clock_nanosleep failed: {e}; falling back to thread::sleep");
                std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                return;
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn sleep_until(deadline: Instant) {
    // std::thread::sleep already resumes after EINTR
    let now = Instant::now();
    if deadline > now {
        std::thread::sleep(deadline - now);
    }
}

/// Sleep for `duration` measured on the monotonic clock.
pub(crate) fn sleep_for(duration: Duration) {
    sleep_until(Instant::now() + duration);
}
