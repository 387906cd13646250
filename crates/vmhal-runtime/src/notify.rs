//! Tick notifications and idle wake-ups.
//!
//! Delivery to the scheduler goes over a bounded channel and never
//! blocks the delivery path: when the channel is full the notification
//! is coalesced into the next one that fits, so the `ticks` carried by
//! all events still add up to the clock's advance. Idle waiters park on a
//! separate condition variable that every tick bumps, regardless of the
//! preemption gate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;
use tracing::trace;
use vmhal_common::time::Tick;

/// A tick announcement for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickEvent {
    /// Clock value when the notification was posted.
    pub tick: Tick,
    /// Ticks this notification accounts for: 1 for a live delivery, the
    /// deferred count for the batch posted when preemption is re-enabled,
    /// plus any ticks whose own notifications were coalesced.
    pub ticks: u64,
    /// Posted when preemption was re-enabled after a disabled window.
    pub batched: bool,
}

impl TickEvent {
    /// A notification for a tick delivered through an open gate.
    #[must_use]
    pub fn live(tick: Tick, ticks: u64) -> Self {
        Self {
            tick,
            ticks,
            batched: false,
        }
    }

    /// The notification for ticks deferred by a closed gate.
    #[must_use]
    pub fn batch(tick: Tick, ticks: u64) -> Self {
        Self {
            tick,
            ticks,
            batched: true,
        }
    }

    /// Whether this event carries ticks deferred by a closed gate.
    #[must_use]
    pub fn is_batched(&self) -> bool {
        self.batched
    }
}

/// Create a bounded notification channel.
pub(crate) fn channel(capacity: usize) -> (TickNotifier, TickEvents) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (
        TickNotifier {
            tx,
            posted: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            unannounced: AtomicU64::new(0),
        },
        TickEvents { rx },
    )
}

/// Sending half, held by the delivery path.
#[derive(Debug)]
pub(crate) struct TickNotifier {
    tx: SyncSender<TickEvent>,
    posted: AtomicU64,
    coalesced: AtomicU64,
    /// Ticks from coalesced notifications, owed to the next posted event.
    unannounced: AtomicU64,
}

impl TickNotifier {
    /// Post without blocking. Returns false if the event was coalesced.
    ///
    /// Callers hold the critical section, so posts never interleave.
    pub(crate) fn post(&self, mut event: TickEvent) -> bool {
        event.ticks += self.unannounced.swap(0, Ordering::AcqRel);
        match self.tx.try_send(event) {
            Ok(()) => {
                self.posted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(event)) => {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                self.unannounced.fetch_add(event.ticks, Ordering::AcqRel);
                trace!(
                    tick = event.tick.0,
                    owed = event.ticks,
                    "Notification channel full, coalescing"
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Ticks waiting for a notification to carry them.
    pub(crate) fn unannounced(&self) -> u64 {
        self.unannounced.load(Ordering::Acquire)
    }

    pub(crate) fn posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }

    pub(crate) fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}

/// Receiving half, owned by the scheduler.
#[derive(Debug)]
pub struct TickEvents {
    rx: Receiver<TickEvent>,
}

impl TickEvents {
    /// Next pending notification, if any.
    #[must_use]
    pub fn try_next(&self) -> Option<TickEvent> {
        self.rx.try_recv().ok()
    }

    /// All notifications pending right now, oldest first.
    pub fn drain(&self) -> impl Iterator<Item = TickEvent> + '_ {
        self.rx.try_iter()
    }

    /// Wait up to `timeout` for the next notification.
    #[must_use]
    pub fn next_timeout(&self, timeout: Duration) -> Option<TickEvent> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Wake-up sequence for idle waiters.
#[derive(Debug, Default)]
pub(crate) struct WakeSignal {
    seq: Mutex<u64>,
    cond: Condvar,
}

impl WakeSignal {
    /// Current sequence number; pass it to `wait_past`.
    pub(crate) fn current(&self) -> u64 {
        *self.seq.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bump the sequence and wake every waiter.
    pub(crate) fn notify(&self) {
        let mut seq = self.seq.lock().unwrap_or_else(PoisonError::into_inner);
        *seq = seq.wrapping_add(1);
        drop(seq);
        self.cond.notify_all();
    }

    /// Block until the sequence moves past `seen` or `timeout` elapses.
    /// Returns true if woken by a `notify`.
    pub(crate) fn wait_past(&self, seen: u64, timeout: Duration) -> bool {
        let guard = self.seq.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |seq| *seq == seen)
            .unwrap_or_else(PoisonError::into_inner);
        *guard != seen
    }
}
