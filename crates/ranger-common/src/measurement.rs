//! Outcome of one measurement cycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a cycle produced no distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// No falling edge arrived within the echo timeout.
    EchoTimeout,
    /// The cycle was still pending when the settle delay ran out.
    StaleRead,
    /// The captured edge pair did not describe a positive duration.
    InvalidDuration,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EchoTimeout => write!(f, "echo timeout"),
            Self::StaleRead => write!(f, "stale read"),
            Self::InvalidDuration => write!(f, "invalid duration"),
        }
    }
}

/// Result emitted once per active cycle: a reading or a failure, never both.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasurementResult {
    /// The echo completed in time.
    Reading {
        /// Distance to the target in centimeters.
        distance_cm: f64,
        /// Width of the echo pulse in microseconds.
        echo_us: u64,
    },
    /// The cycle produced no usable echo.
    Failure {
        /// What went wrong.
        cause: FailureCause,
    },
}

impl MeasurementResult {
    /// Build a failure result.
    #[must_use]
    pub fn failure(cause: FailureCause) -> Self {
        Self::Failure { cause }
    }

    /// Returns true for a successful reading.
    #[must_use]
    pub fn is_reading(&self) -> bool {
        matches!(self, Self::Reading { .. })
    }

    /// Distance in centimeters, if this is a reading.
    #[must_use]
    pub fn distance_cm(&self) -> Option<f64> {
        match self {
            Self::Reading { distance_cm, .. } => Some(*distance_cm),
            Self::Failure { .. } => None,
        }
    }

    /// Failure cause, if this is a failure.
    #[must_use]
    pub fn failure_cause(&self) -> Option<FailureCause> {
        match self {
            Self::Reading { .. } => None,
            Self::Failure { cause } => Some(*cause),
        }
    }
}
