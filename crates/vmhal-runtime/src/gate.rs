//! Preemption gate.
//!
//! Decides whether a delivered tick is announced to the scheduler right
//! away or deferred. Deferral only postpones the notification: the clock
//! increment has already happened. Re-opening the gate hands back the
//! number of deferred ticks so they can be announced as one batch.
//!
//! Every mutation takes a `CriticalGuard` so the gate cannot be touched
//! outside the critical section.

use crate::critical::CriticalGuard;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// What to do with a freshly delivered tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Notify the scheduler now, covering `ticks` ticks (more than one
    /// only if ticks were deferred without the lock).
    Deliver {
        /// Ticks covered by the notification.
        ticks: u64,
    },
    /// Gate closed; the tick joins `pending` deferred ticks.
    Deferred {
        /// Deferred ticks including this one.
        pending: u64,
    },
}

/// Preemption state plus the count of ticks awaiting delivery.
#[derive(Debug)]
pub struct PreemptionGate {
    open: AtomicBool,
    deferred: AtomicU64,
    /// Cooperative hosts: ticks only happen at safe points, toggles are no-ops.
    fixed_open: bool,
}

impl Default for PreemptionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PreemptionGate {
    /// A gate that starts closed; opened explicitly after initialization.
    #[must_use]
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
            deferred: AtomicU64::new(0),
            fixed_open: false,
        }
    }

    /// A gate for hosts without asynchronous delivery.
    #[must_use]
    pub fn always_open() -> Self {
        Self {
            open: AtomicBool::new(true),
            deferred: AtomicU64::new(0),
            fixed_open: true,
        }
    }

    /// Whether ticks are currently announced as they arrive.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Ticks delivered while closed and not yet announced.
    #[must_use]
    pub fn deferred(&self) -> u64 {
        self.deferred.load(Ordering::Acquire)
    }

    /// Open the gate. Returns the deferred tick count to announce, if any.
    pub fn open(&self, _cs: &CriticalGuard<'_>) -> Option<u64> {
        if self.fixed_open || self.open.swap(true, Ordering::AcqRel) {
            return None;
        }
        match self.deferred.swap(0, Ordering::AcqRel) {
            0 => None,
            pending => Some(pending),
        }
    }

    /// Close the gate.
    pub fn close(&self, _cs: &CriticalGuard<'_>) {
        if !self.fixed_open {
            self.open.store(false, Ordering::Release);
        }
    }

    /// Close the gate and forget deferred ticks, for a HAL being shut down.
    /// Returns the number of ticks that were still unannounced.
    pub fn reset(&self, _cs: &CriticalGuard<'_>) -> u64 {
        if self.fixed_open {
            return 0;
        }
        self.open.store(false, Ordering::Release);
        self.deferred.swap(0, Ordering::AcqRel)
    }

    /// Route one delivered tick.
    pub fn route(&self, _cs: &CriticalGuard<'_>) -> Route {
        if self.is_open() {
            Route::Deliver {
                ticks: 1 + self.deferred.swap(0, Ordering::AcqRel),
            }
        } else {
            Route::Deferred {
                pending: self.push_deferred(),
            }
        }
    }

    /// Count a tick as deferred when the critical section itself failed.
    /// It is announced by the next delivery or `open`.
    pub(crate) fn defer_unguarded(&self) -> u64 {
        self.push_deferred()
    }

    fn push_deferred(&self) -> u64 {
        self.deferred.fetch_add(1, Ordering::AcqRel) + 1
    }
}
