//! The byte sink: the VM's single output channel.
//!
//! Writes are unbuffered. A short write is returned as-is; looping until
//! the whole buffer is out is the caller's business (see `write_all`).

use std::sync::{Arc, Mutex};
use tracing::trace;
use vmhal_common::error::{HalError, HalResult};

/// Raw byte output channel.
pub trait ByteSink: Send + Sync {
    /// Write some prefix of `buf`, returning how many bytes were accepted.
    ///
    /// # Errors
    ///
    /// `HalError::SinkWriteFailure` if the channel rejected the write.
    fn write(&self, buf: &[u8]) -> HalResult<usize>;

    /// Commit anything buffered between this layer and the channel.
    ///
    /// # Errors
    ///
    /// `HalError::SinkFlushFailure` if the channel could not be synced.
    fn flush(&self) -> HalResult<()>;
}

/// Write the whole buffer, looping over short writes.
///
/// # Errors
///
/// Propagates the sink's write error, or `SinkWriteFailure` if the sink
/// stops accepting bytes.
pub fn write_all(sink: &dyn ByteSink, mut buf: &[u8]) -> HalResult<()> {
    while !buf.is_empty() {
        let n = sink.write(buf)?;
        if n == 0 {
            return Err(HalError::SinkWriteFailure(format!(
                "sink accepted 0 of {} bytes",
                buf.len()
            )));
        }
        buf = &buf[n..];
    }
    Ok(())
}

/// Standard output (fd 1), written with `write(2)` and synced with `fsync(2)`.
#[derive(Debug, Clone, Copy)]
pub struct StdoutSink {
    fd: libc::c_int,
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StdoutSink {
    /// Sink on the process's standard output.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fd: libc::STDOUT_FILENO,
        }
    }

    #[cfg(test)]
    fn with_fd(fd: libc::c_int) -> Self {
        Self { fd }
    }
}

impl ByteSink for StdoutSink {
    fn write(&self, buf: &[u8]) -> HalResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            // SAFETY: buf is a valid slice for buf.len() bytes for the duration of the call
            let n = unsafe { libc::write(self.fd, buf.as_ptr().cast::<libc::c_void>(), buf.len()) };
            if n >= 0 {
                #[allow(clippy::cast_sign_loss)]
                let written = n as usize;
                if written < buf.len() {
                    trace!(written, requested = buf.len(), "Short write on output channel");
                }
                return Ok(written);
            }
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(HalError::SinkWriteFailure(err.to_string()));
        }
    }

    fn flush(&self) -> HalResult<()> {
        // SAFETY: fsync on a file descriptor has no memory-safety preconditions
        if unsafe { libc::fsync(self.fd) } == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            // Pipes, terminals and sockets have nothing to sync
            Some(libc::EINVAL | libc::EROFS | libc::ENOTSUP) => Ok(()),
            _ => Err(HalError::SinkFlushFailure(err.to_string())),
        }
    }
}

/// In-memory sink for embedding the HAL in tests and tools.
///
/// Clones share the same buffer. `max_write` caps the bytes accepted per
/// call to reproduce short writes.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    inner: Arc<Mutex<CaptureState>>,
}

#[derive(Debug, Default)]
struct CaptureState {
    committed: Vec<u8>,
    pending: Vec<u8>,
    max_write: Option<usize>,
    fail_writes: bool,
    flushes: u64,
}

impl CaptureSink {
    /// Empty capture sink accepting whole buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture sink accepting at most `max_write` bytes per write call.
    #[must_use]
    pub fn with_max_write(max_write: usize) -> Self {
        let sink = Self::new();
        sink.state().max_write = Some(max_write);
        sink
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Bytes made observable by `flush`.
    #[must_use]
    pub fn flushed(&self) -> Vec<u8> {
        self.state().committed.clone()
    }

    /// Everything written so far, flushed or not.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        let state = self.state();
        let mut all = state.committed.clone();
        all.extend_from_slice(&state.pending);
        all
    }

    /// Everything written so far as (lossy) UTF-8.
    #[must_use]
    pub fn contents_string(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// Number of flush calls.
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.state().flushes
    }

    fn state(&self) -> std::sync::MutexGuard<'_, CaptureState> {
        // A panic while holding this lock can only come from a test assertion
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ByteSink for CaptureSink {
    fn write(&self, buf: &[u8]) -> HalResult<usize> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(HalError::SinkWriteFailure("capture sink rejected write".into()));
        }
        let n = state.max_write.map_or(buf.len(), |max| buf.len().min(max));
        state.pending.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&self) -> HalResult<()> {
        let mut state = self.state();
        let pending = std::mem::take(&mut state.pending);
        state.committed.extend_from_slice(&pending);
        state.flushes += 1;
        Ok(())
    }
}
