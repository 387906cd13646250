//! Logical time values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A reading of the logical clock: the number of ticks delivered since start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Tick(pub u64);

impl Tick {
    /// The clock value before any tick has been delivered.
    pub const ZERO: Tick = Tick(0);

    /// Ticks elapsed since `earlier`. Saturates at zero.
    #[must_use]
    pub fn since(self, earlier: Tick) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick {}", self.0)
    }
}

impl From<u64> for Tick {
    fn from(value: u64) -> Self {
        Tick(value)
    }
}
