//! HAL lifecycle state machine.
//!
//! UNINITIALIZED → READY → SHUT_DOWN → READY
//!
//! A second `initialize()` while READY is rejected with
//! `AlreadyInitialized` instead of re-arming the timer.

use crate::error::{HalError, HalResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of the HAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HalState {
    /// Created, timer not armed, preemption disabled.
    #[default]
    Uninitialized,
    /// Tick source armed; the scheduler may run.
    Ready,
    /// Torn down; may be initialized again.
    ShutDown,
}

impl fmt::Display for HalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "UNINITIALIZED"),
            Self::Ready => write!(f, "READY"),
            Self::ShutDown => write!(f, "SHUT_DOWN"),
        }
    }
}

impl HalState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: HalState) -> bool {
        use HalState::{Ready, ShutDown, Uninitialized};

        matches!(
            (self, target),
            (Uninitialized, Ready) | (Ready, ShutDown) | (ShutDown, Ready)
        )
    }

    /// Returns true if ticks may be delivered.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// State machine wrapper with transition counting.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    current: HalState,
    transition_count: u64,
}

impl Lifecycle {
    /// Create a lifecycle in UNINITIALIZED.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> HalState {
        self.current
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    ///
    /// `AlreadyInitialized` for READY → READY, `InvalidStateTransition`
    /// for any other disallowed transition.
    pub fn transition(&mut self, target: HalState) -> HalResult<()> {
        if self.current == HalState::Ready && target == HalState::Ready {
            return Err(HalError::AlreadyInitialized);
        }
        if !self.current.can_transition_to(target) {
            return Err(HalError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            });
        }
        self.current = target;
        self.transition_count += 1;
        Ok(())
    }
}
