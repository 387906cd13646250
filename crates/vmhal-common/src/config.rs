//! Configuration structures for the HAL.
//!
//! Supports TOML deserialization with defaults matching the classic
//! 4 ms tick / 3-tick timeslice setup. Durations use humantime format
//! (`"4ms"`, `"10ms"`).

use crate::error::{HalError, HalResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// 1 ms tick.
pub const TICK_UNIT_1_MS: Duration = Duration::from_millis(1);
/// 2 ms tick.
pub const TICK_UNIT_2_MS: Duration = Duration::from_millis(2);
/// 4 ms tick (default).
pub const TICK_UNIT_4_MS: Duration = Duration::from_millis(4);
/// 10 ms tick.
pub const TICK_UNIT_10_MS: Duration = Duration::from_millis(10);

/// Default number of ticks per timeslice.
pub const DEFAULT_TIMESLICE_TICK_COUNT: u32 = 3;

/// Timeslice tick counts above this still work but defeat round-robin fairness.
pub const RECOMMENDED_MAX_TIMESLICE_TICK_COUNT: u32 = 10;

/// Top-level HAL configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HalConfig {
    /// Period of one logical tick.
    ///
    /// Small values raise the demands on host timer resolution; on Linux
    /// the achievable accuracy depends on the kernel's `HZ` (see `time(7)`).
    #[serde(with = "humantime_serde")]
    pub tick_unit: Duration,

    /// Number of ticks constituting one scheduler timeslice (at least 1).
    pub timeslice_tick_count: u32,

    /// How ticks reach the scheduler.
    pub mode: TickMode,

    /// What to do when the critical section primitive itself fails.
    pub lock_failure: LockFailurePolicy,

    /// Capacity of the tick notification channel.
    pub notify_capacity: usize,

    /// Tick interval statistics.
    pub metrics: MetricsConfig,

    /// Interval timer thread settings (interrupt mode only).
    pub timer_thread: TimerThreadConfig,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            tick_unit: TICK_UNIT_4_MS,
            timeslice_tick_count: DEFAULT_TIMESLICE_TICK_COUNT,
            mode: TickMode::default(),
            lock_failure: LockFailurePolicy::default(),
            notify_capacity: 64,
            metrics: MetricsConfig::default(),
            timer_thread: TimerThreadConfig::default(),
        }
    }
}

/// Tick delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickMode {
    /// A HAL-owned interval timer delivers ticks asynchronously.
    Interrupt,
    /// Ticks are delivered asynchronously by an outside source (board ISR,
    /// test harness) through `deliver_tick`. No timer is armed.
    External,
    /// No asynchronous delivery; idle wait advances the clock.
    Cooperative,
}

impl Default for TickMode {
    #[cfg(not(feature = "cooperative"))]
    fn default() -> Self {
        Self::Interrupt
    }

    #[cfg(feature = "cooperative")]
    fn default() -> Self {
        Self::Cooperative
    }
}

impl TickMode {
    /// Whether ticks may arrive on a path other than the scheduler's own.
    #[must_use]
    pub fn is_asynchronous(self) -> bool {
        !matches!(self, Self::Cooperative)
    }
}

impl fmt::Display for TickMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "interrupt"),
            Self::External => write!(f, "external"),
            Self::Cooperative => write!(f, "cooperative"),
        }
    }
}

impl std::str::FromStr for TickMode {
    type Err = HalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interrupt" => Ok(Self::Interrupt),
            "external" => Ok(Self::External),
            "cooperative" => Ok(Self::Cooperative),
            other => Err(HalError::Config(format!("unknown tick mode '{other}'"))),
        }
    }
}

/// Policy for failures of the critical section primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockFailurePolicy {
    /// Report to the byte sink and continue as if the operation succeeded.
    #[default]
    Degrade,
    /// Surface the failure to the caller as `HalError::LockFailure`.
    Fatal,
}

/// Tick metrics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Record inter-tick intervals.
    pub enabled: bool,

    /// Size of the interval ring buffer.
    pub histogram_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            histogram_size: 1024,
        }
    }
}

/// Interval timer thread configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerThreadConfig {
    /// Run the timer thread under SCHED_FIFO (requires privileges).
    pub realtime: bool,

    /// SCHED_FIFO priority (1-99).
    pub priority: u8,

    /// Treat a refused priority change as an initialization failure.
    pub fail_fast: bool,
}

impl Default for TimerThreadConfig {
    fn default() -> Self {
        Self {
            realtime: false,
            priority: 80,
            fail_fast: false,
        }
    }
}

impl HalConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check the invariants the tick machinery relies on.
    ///
    /// # Errors
    ///
    /// Returns `HalError::Config` for a zero tick unit, a zero timeslice,
    /// or a zero-capacity notification channel.
    pub fn validate(&self) -> HalResult<()> {
        if self.tick_unit.is_zero() {
            return Err(HalError::Config("tick_unit must be positive".into()));
        }
        if self.timeslice_tick_count == 0 {
            return Err(HalError::Config(
                "timeslice_tick_count must be a natural number".into(),
            ));
        }
        if self.notify_capacity == 0 {
            return Err(HalError::Config("notify_capacity must be at least 1".into()));
        }
        if self.timer_thread.realtime && !(1..=99).contains(&self.timer_thread.priority) {
            return Err(HalError::Config(format!(
                "timer_thread.priority {} outside 1-99",
                self.timer_thread.priority
            )));
        }
        if self.timeslice_tick_count > RECOMMENDED_MAX_TIMESLICE_TICK_COUNT {
            tracing::warn!(
                timeslice_tick_count = self.timeslice_tick_count,
                "timeslice_tick_count above the recommended range 1-10"
            );
        }
        Ok(())
    }

    /// Nominal duration of one timeslice, excluding host jitter.
    #[must_use]
    pub fn timeslice(&self) -> Duration {
        self.tick_unit * self.timeslice_tick_count
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
