//! Critical section lock.
//!
//! Serializes scheduler state between the tick delivery path and the
//! main execution path. The lock is reentrant for its current holder so
//! a path that already owns it can call back into HAL operations that
//! take it again.
//!
//! Failures of the primitive itself are handled per `LockFailurePolicy`:
//! `Degrade` reports to the byte sink and carries on, `Fatal` returns
//! `HalError::LockFailure`.

use crate::sink::{write_all, ByteSink};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, LockResult, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use tracing::error;
use vmhal_common::config::LockFailurePolicy;
use vmhal_common::error::{HalError, HalResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockOp {
    Lock,
    Unlock,
}

impl fmt::Display for LockOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lock => write!(f, "HAL LOCK ERROR"),
            Self::Unlock => write!(f, "HAL UNLOCK ERROR"),
        }
    }
}

#[derive(Debug, Default)]
struct Owner {
    thread: Option<ThreadId>,
    depth: usize,
}

#[derive(Debug, Default)]
struct ReentrantLock {
    owner: Mutex<Owner>,
    released: Condvar,
}

#[derive(Debug)]
enum LockImpl {
    Reentrant(ReentrantLock),
    /// Single path of control: nothing to exclude.
    Noop,
}

/// The process-wide critical section.
pub struct CriticalSection {
    imp: LockImpl,
    policy: LockFailurePolicy,
    diagnostics: Arc<dyn ByteSink>,
    failures: AtomicU64,
}

impl fmt::Debug for CriticalSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalSection")
            .field("imp", &self.imp)
            .field("policy", &self.policy)
            .field("failures", &self.failures.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CriticalSection {
    /// A real lock for hosts with an asynchronous delivery path.
    pub fn new(policy: LockFailurePolicy, diagnostics: Arc<dyn ByteSink>) -> Self {
        Self {
            imp: LockImpl::Reentrant(ReentrantLock::default()),
            policy,
            diagnostics,
            failures: AtomicU64::new(0),
        }
    }

    /// A lock that does nothing, for cooperative hosts.
    pub fn noop(diagnostics: Arc<dyn ByteSink>) -> Self {
        Self {
            imp: LockImpl::Noop,
            policy: LockFailurePolicy::Degrade,
            diagnostics,
            failures: AtomicU64::new(0),
        }
    }

    /// Whether this lock excludes anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self.imp, LockImpl::Noop)
    }

    /// Failures of the primitive observed so far (degraded or not).
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Scoped acquisition; the guard releases on drop.
    ///
    /// # Errors
    ///
    /// `LockFailure` under the `Fatal` policy if the primitive failed.
    pub fn enter(&self) -> HalResult<CriticalGuard<'_>> {
        self.acquire()?;
        Ok(CriticalGuard {
            section: self,
            _not_send: PhantomData,
        })
    }

    /// Block until the calling thread holds the lock.
    ///
    /// # Errors
    ///
    /// `LockFailure` under the `Fatal` policy if the primitive failed.
    pub fn acquire(&self) -> HalResult<()> {
        let LockImpl::Reentrant(lock) = &self.imp else {
            return Ok(());
        };
        let me = thread::current().id();
        let mut owner = self.recover(lock.owner.lock(), LockOp::Lock)?;
        loop {
            match owner.thread {
                None => {
                    owner.thread = Some(me);
                    owner.depth = 1;
                    return Ok(());
                }
                Some(holder) if holder == me => {
                    owner.depth += 1;
                    return Ok(());
                }
                Some(_) => {
                    owner = self.recover(lock.released.wait(owner), LockOp::Lock)?;
                }
            }
        }
    }

    /// Release one level of ownership held by the calling thread.
    ///
    /// # Errors
    ///
    /// `LockFailure` under the `Fatal` policy if the primitive failed or
    /// the caller does not hold the lock.
    pub fn release(&self) -> HalResult<()> {
        let LockImpl::Reentrant(lock) = &self.imp else {
            return Ok(());
        };
        let me = thread::current().id();
        let mut owner = self.recover(lock.owner.lock(), LockOp::Unlock)?;
        if owner.thread != Some(me) {
            drop(owner);
            return self.fail(LockOp::Unlock, "lock not held by the releasing path");
        }
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
            drop(owner);
            lock.released.notify_one();
        }
        Ok(())
    }

    /// Whether the calling thread currently holds the lock.
    #[must_use]
    pub fn held_by_current(&self) -> bool {
        match &self.imp {
            LockImpl::Noop => false,
            LockImpl::Reentrant(lock) => lock
                .owner
                .lock()
                .map(|o| o.thread == Some(thread::current().id()))
                .unwrap_or(false),
        }
    }

    fn recover<'a, T>(
        &self,
        result: LockResult<MutexGuard<'a, T>>,
        op: LockOp,
    ) -> HalResult<MutexGuard<'a, T>> {
        match result {
            Ok(guard) => Ok(guard),
            Err(poisoned) => {
                self.fail(op, "lock state poisoned by a panicking holder")?;
                Ok(poisoned.into_inner())
            }
        }
    }

    fn fail(&self, op: LockOp, reason: &str) -> HalResult<()> {
        self.failures.fetch_add(1, Ordering::Relaxed);
        error!(%op, reason, policy = ?self.policy, "Critical section failure");
        match self.policy {
            LockFailurePolicy::Degrade => {
                let line = format!("{op}: {reason}\n");
                // Nowhere left to report a sink failure
                let _ = write_all(self.diagnostics.as_ref(), line.as_bytes());
                Ok(())
            }
            LockFailurePolicy::Fatal => Err(HalError::LockFailure(format!("{op}: {reason}"))),
        }
    }
}

/// Proof that the current path holds the critical section.
///
/// Released on drop, including early returns and unwinding. Not `Send`:
/// ownership belongs to the thread that acquired it.
#[must_use = "the critical section is released as soon as the guard is dropped"]
pub struct CriticalGuard<'a> {
    section: &'a CriticalSection,
    _not_send: PhantomData<*const ()>,
}

impl fmt::Debug for CriticalGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalGuard").finish_non_exhaustive()
    }
}

impl Drop for CriticalGuard<'_> {
    fn drop(&mut self) {
        // Fatal-policy failures are already logged by `fail`
        let _ = self.section.release();
    }
}
