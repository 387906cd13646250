//! Real-time priority for the interval timer thread.
//!
//! Tick accuracy on a loaded host is bounded by how quickly the timer
//! thread is scheduled after its deadline. Running it under SCHED_FIFO
//! keeps that latency small. Requires root or CAP_SYS_NICE.

#![allow(unused_imports)] // Platform-specific code may not use all imports

use tracing::{debug, info, warn};
use vmhal_common::error::{HalError, HalResult};

/// Put the calling thread under SCHED_FIFO at `priority` (clamped to 1-99).
///
/// # Errors
///
/// `InitializationFailure` if the kernel refuses the change.
#[cfg(target_os = "linux")]
pub fn promote_current_thread(priority: u8) -> HalResult<u8> {
    let clamped = priority.clamp(1, 99);
    if clamped != priority {
        warn!(
            original = priority,
            clamped, "Timer thread priority clamped to valid range"
        );
    }

    let param = libc::sched_param {
        sched_priority: i32::from(clamped),
    };

    // SAFETY: pthread_self() is always a valid handle for the calling thread
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc != 0 {
        let err = std::io::Error::from_raw_os_error(rc);
        if rc == libc::EPERM {
            warn!(
                "pthread_setschedparam failed with EPERM - timer thread runs without RT priority. \
                 Grant CAP_SYS_NICE or run as root for tighter tick jitter."
            );
        }
        return Err(HalError::InitializationFailure(format!(
            "cannot set SCHED_FIFO priority {clamped} on timer thread: {err}"
        )));
    }

    info!(priority = clamped, "Timer thread running under SCHED_FIFO");
    Ok(clamped)
}

#[cfg(not(target_os = "linux"))]
pub fn promote_current_thread(priority: u8) -> HalResult<u8> {
    warn!(priority, "Real-time thread priority not available on this platform");
    Err(HalError::InitializationFailure(
        "real-time thread priority not available on this platform".into(),
    ))
}

/// Whether RT scheduling is likely to succeed for this process.
#[cfg(target_os = "linux")]
#[must_use]
pub fn can_use_rt_scheduling() -> bool {
    // SAFETY: geteuid has no preconditions
    if unsafe { libc::geteuid() } == 0 {
        return true;
    }
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: rlim is a valid out-pointer
    let ok = unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut rlim) } == 0;
    debug!(ok, rtprio = rlim.rlim_cur, "Checked RLIMIT_RTPRIO");
    ok && rlim.rlim_cur > 0
}

#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn can_use_rt_scheduling() -> bool {
    false
}
