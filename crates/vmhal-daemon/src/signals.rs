//! Signal handling for stopping the demo loop.
//!
//! SIGINT and SIGTERM set an atomic flag that the scheduler loop polls
//! between steps. The loop idles for at most one tick unit at a time, so
//! a stop request is noticed promptly.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Signals the daemon handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - termination request.
    Terminate,
    /// SIGINT - interrupt (Ctrl+C).
    Interrupt,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Stop flag shared between the signal poller and the scheduler loop.
#[derive(Debug, Default)]
pub struct SignalState {
    stop_requested: AtomicBool,
    signal_count: AtomicU32,
}

impl SignalState {
    /// Create a new signal state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the loop should stop.
    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Relaxed)
    }

    /// Request a stop (can be called from any thread).
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Relaxed);
    }

    fn record_signal(&self, kind: SignalKind) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
        debug!(%kind, "Signal recorded");
    }

    /// Number of signals received.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }
}

/// Handle for the process signal handlers.
#[derive(Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Create the handler and register SIGINT/SIGTERM on Unix.
    pub fn new() -> std::io::Result<Self> {
        let handler = Self {
            state: Arc::new(SignalState::new()),
        };

        #[cfg(unix)]
        handler.register_unix_handlers()?;

        Ok(handler)
    }

    #[cfg(unix)]
    fn register_unix_handlers(&self) -> std::io::Result<()> {
        use std::os::raw::c_int;

        // Handlers may only touch atomics; a poll thread forwards to the state
        static TERM_FLAG: AtomicBool = AtomicBool::new(false);
        static INT_FLAG: AtomicBool = AtomicBool::new(false);

        let state = Arc::clone(&self.state);
        std::thread::Builder::new()
            .name("vmhal-signals".into())
            .spawn(move || loop {
                for (flag, kind) in [
                    (&TERM_FLAG, SignalKind::Terminate),
                    (&INT_FLAG, SignalKind::Interrupt),
                ] {
                    if flag.swap(false, Ordering::Relaxed) {
                        info!(%kind, "Stop signal received");
                        state.record_signal(kind);
                        state.request_stop();
                    }
                }
                if state.stop_requested() {
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(10));
            })?;

        extern "C" fn sigterm_handler(_: c_int) {
            TERM_FLAG.store(true, Ordering::Relaxed);
        }

        extern "C" fn sigint_handler(_: c_int) {
            INT_FLAG.store(true, Ordering::Relaxed);
        }

        // SAFETY: the handlers only store to static atomics, which is async-signal-safe
        let failed = unsafe {
            libc::signal(libc::SIGTERM, sigterm_handler as libc::sighandler_t) == libc::SIG_ERR
                || libc::signal(libc::SIGINT, sigint_handler as libc::sighandler_t)
                    == libc::SIG_ERR
        };
        if failed {
            return Err(std::io::Error::last_os_error());
        }

        debug!("Unix signal handlers registered");
        Ok(())
    }

    /// Whether the loop should stop.
    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.state.stop_requested()
    }

    /// Request a stop without a signal.
    pub fn request_stop(&self) {
        info!("Stop requested");
        self.state.request_stop();
    }

    /// Signal state for inspection.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}
