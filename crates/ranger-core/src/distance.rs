//! Echo duration to distance conversion.
//!
//! The echo pulse covers the round trip, so the one-way distance is half the
//! path sound travels during the pulse.

/// Speed of sound in dry air at about 20 °C, in centimeters per microsecond.
pub const SPEED_OF_SOUND_CM_PER_US: f64 = 0.0343;

/// Width of the echo pulse, or `None` unless `falling_us` is strictly later.
#[must_use]
pub fn echo_duration_us(rising_us: u64, falling_us: u64) -> Option<u64> {
    falling_us.checked_sub(rising_us).filter(|us| *us > 0)
}

/// One-way distance in centimeters for an echo of `echo_us` microseconds.
#[must_use]
pub fn distance_cm(echo_us: u64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let us = echo_us as f64;
    us * SPEED_OF_SOUND_CM_PER_US / 2.0
}

/// Echo width that corresponds to `cm`, rounded to the nearest microsecond.
///
/// Inverse of [`distance_cm`]; used by the simulated sensor.
#[must_use]
pub fn echo_us_for_distance(cm: f64) -> u64 {
    if !cm.is_finite() || cm <= 0.0 {
        return 0;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let us = (cm * 2.0 / SPEED_OF_SOUND_CM_PER_US).round() as u64;
    us
}
