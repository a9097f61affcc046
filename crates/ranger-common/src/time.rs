//! Time helpers: cycle epochs, microsecond conversions, and label time of day.
//!
//! All capture timestamps are microseconds on a monotonic timebase shared by
//! the edge handler, the alarm service, and the cycle controller. The origin is
//! arbitrary (process start for the system clock, zero for the manual clock).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// Index of a measurement cycle.
///
/// Incremented by the controller every time it resets the capture cell, so
/// every published snapshot can be tied to the cycle that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Epoch(pub u64);

impl Epoch {
    /// The epoch following this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Convert a duration to whole microseconds, saturating at `u64::MAX`.
#[must_use]
pub fn duration_to_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Convert a duration to whole microseconds for `embedded-hal` delays.
#[must_use]
pub fn duration_to_us_u32(duration: Duration) -> u32 {
    u32::try_from(duration.as_micros()).unwrap_or(u32::MAX)
}

/// Wall-clock style time of day used to label output.
///
/// Carries no date and no timezone; it wraps at midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeOfDay {
    seconds: u32,
}

impl TimeOfDay {
    /// Build a time of day, returning `None` for out-of-range fields.
    #[must_use]
    pub fn from_hms(hour: u32, min: u32, sec: u32) -> Option<Self> {
        (hour < 24 && min < 60 && sec < 60).then(|| Self {
            seconds: hour * 3600 + min * 60 + sec,
        })
    }

    /// Hours, 0-23.
    #[must_use]
    pub fn hour(&self) -> u32 {
        self.seconds / 3600
    }

    /// Minutes, 0-59.
    #[must_use]
    pub fn minute(&self) -> u32 {
        self.seconds / 60 % 60
    }

    /// Seconds, 0-59.
    #[must_use]
    pub fn second(&self) -> u32 {
        self.seconds % 60
    }

    /// Advance by `secs` seconds, wrapping at midnight.
    #[must_use]
    pub fn plus_seconds(self, secs: u64) -> Self {
        let offset = u32::try_from(secs % u64::from(SECONDS_PER_DAY)).unwrap_or(0);
        Self {
            seconds: (self.seconds + offset) % SECONDS_PER_DAY,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour(), self.minute(), self.second())
    }
}

/// Error returned when parsing a `HH:MM:SS` string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time of day '{0}', expected HH:MM:SS")]
pub struct ParseTimeOfDayError(String);

impl FromStr for TimeOfDay {
    type Err = ParseTimeOfDayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTimeOfDayError(s.to_string());
        let mut parts = s.trim().split(':').map(str::parse::<u32>);
        let (Some(Ok(h)), Some(Ok(m)), Some(Ok(sec)), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(err());
        };
        Self::from_hms(h, m, sec).ok_or_else(err)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
