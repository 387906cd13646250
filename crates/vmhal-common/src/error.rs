use thiserror::Error;

/// HAL error types covering initialization, locking, and the byte sink.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HalError {
    /// Timer or host setup failed. Fatal: the scheduler must not start.
    #[error("initialization failure: {0}")]
    InitializationFailure(String),

    /// `initialize()` was called on a HAL that is already running.
    #[error("HAL already initialized")]
    AlreadyInitialized,

    /// An operation that needs a running HAL was called before `initialize()`.
    #[error("HAL not initialized")]
    NotInitialized,

    /// The critical section primitive itself failed.
    #[error("critical section failure: {0}")]
    LockFailure(String),

    /// Writing to the byte sink failed.
    #[error("sink write failure: {0}")]
    SinkWriteFailure(String),

    /// Flushing the byte sink failed.
    #[error("sink flush failure: {0}")]
    SinkFlushFailure(String),

    /// Configuration value out of range.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid lifecycle transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl HalError {
    /// Returns true for errors that must abort start-up.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InitializationFailure(_) | Self::Config(_) | Self::AlreadyInitialized
        )
    }
}

/// Convenience type alias for HAL operations.
pub type HalResult<T> = Result<T, HalError>;
