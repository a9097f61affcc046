//! Configuration structures for the range finder.
//!
//! Supports TOML deserialization. Every default matches the reference
//! timing of the HC-SR04 driver (10 µs trigger, 30 ms echo timeout, 50 ms
//! settle delay, 1 s cadence), so an empty file is a valid configuration.

use crate::time::TimeOfDay;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Width of the trigger pulse in microseconds.
pub const TRIGGER_PULSE_US: u64 = 10;
/// Window after a rising edge in which the falling edge must arrive.
pub const ECHO_TIMEOUT_US: u64 = 30_000;
/// Period between measurement cycles.
pub const CADENCE_US: u64 = 1_000_000;
/// Wait between firing the trigger and inspecting the echo state.
pub const SETTLE_DELAY_MS: u64 = 50;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RangerConfig {
    /// Measurement timing.
    pub timing: TimingConfig,

    /// Sensor wiring and backend selection.
    pub sensor: SensorConfig,

    /// Simulated sensor behaviour.
    pub simulation: SimulationConfig,

    /// Output label clock.
    pub clock: ClockConfig,

    /// Command console.
    pub console: ConsoleConfig,

    /// Metrics collection.
    pub metrics: MetricsConfig,
}

/// Measurement cycle timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How long the trigger line is held high.
    #[serde(with = "humantime_serde")]
    pub trigger_pulse: Duration,

    /// Maximum echo width before the cycle is declared timed out.
    #[serde(with = "humantime_serde")]
    pub echo_timeout: Duration,

    /// Wait between trigger and inspection; must exceed `echo_timeout`.
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,

    /// Period between cycle starts while active.
    #[serde(with = "humantime_serde")]
    pub cadence: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            trigger_pulse: Duration::from_micros(TRIGGER_PULSE_US),
            echo_timeout: Duration::from_micros(ECHO_TIMEOUT_US),
            settle_delay: Duration::from_millis(SETTLE_DELAY_MS),
            cadence: Duration::from_micros(CADENCE_US),
        }
    }
}

impl TimingConfig {
    /// Check the ordering constraints between the timing values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the trigger pulse is zero, the
    /// settle delay does not exceed the echo timeout, or the cadence cannot
    /// fit one pulse plus one settle delay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trigger_pulse.is_zero() {
            return Err(ConfigError::Invalid("trigger_pulse must be non-zero".into()));
        }
        if self.settle_delay <= self.echo_timeout {
            return Err(ConfigError::Invalid(format!(
                "settle_delay ({}) must exceed echo_timeout ({})",
                humantime::format_duration(self.settle_delay),
                humantime::format_duration(self.echo_timeout)
            )));
        }
        if self.cadence <= self.trigger_pulse + self.settle_delay {
            return Err(ConfigError::Invalid(format!(
                "cadence ({}) must exceed trigger_pulse + settle_delay",
                humantime::format_duration(self.cadence)
            )));
        }
        Ok(())
    }
}

/// Sensor backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SensorBackend {
    /// In-process simulated sensor.
    #[default]
    Simulated,
    /// Raspberry Pi GPIO (requires the `gpio` feature of the daemon).
    Gpio,
}

/// Sensor wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Which backend drives the trigger and delivers echo edges.
    pub backend: SensorBackend,

    /// BCM number of the trigger output.
    pub trigger_pin: u8,

    /// BCM number of the echo input.
    pub echo_pin: u8,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            backend: SensorBackend::Simulated,
            trigger_pin: 14,
            echo_pin: 15,
        }
    }
}

/// Simulated sensor behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Distance of the simulated target.
    pub distance_cm: f64,

    /// Delay between trigger falling edge and echo rising edge.
    #[serde(with = "humantime_serde")]
    pub response_latency: Duration,

    /// Every Nth echo is lost (rising edge without falling edge); 0 = never.
    pub drop_every: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            distance_cm: 8.575,
            response_latency: Duration::from_micros(450),
            drop_every: 0,
        }
    }
}

/// Output label clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Time of day shown when the daemon starts.
    pub start: TimeOfDay,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            start: TimeOfDay::from_hms(21, 30, 0).unwrap_or_default(),
        }
    }
}

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `HH:MM:SS - 9 cm` lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Command console configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Output format for readings.
    pub format: OutputFormat,

    /// Longest accepted command; extra characters are dropped.
    pub max_command_len: usize,

    /// Start measuring without waiting for a `start` command.
    pub start_active: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            max_command_len: 19,
            start_active: false,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Size of the echo-width ring buffer.
    pub histogram_size: usize,

    /// How often a status summary is logged.
    #[serde(with = "humantime_serde")]
    pub status_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            histogram_size: 1024,
            status_interval: Duration::from_secs(60),
        }
    }
}

impl RangerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        debug!(?path, "Reading configuration file");
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
    /// Returns an error if the TOML is invalid or the timing is inconsistent.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timing.validate()?;
        if !self.simulation.distance_cm.is_finite() || self.simulation.distance_cm < 0.0 {
            return Err(ConfigError::Invalid(
                "simulation.distance_cm must be a non-negative number".into(),
            ));
        }
        if self.console.max_command_len == 0 {
            return Err(ConfigError::Invalid(
                "console.max_command_len must be non-zero".into(),
            ));
        }
        Ok(())
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

    /// Values parsed but violate a constraint.
    #[error("invalid configuration: {0}")]
    Invalid(String),
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
