//! Measurement metrics for range monitoring.
//!
//! Provides a ring buffer of recent echo widths plus reading/failure counters,
//! with no heap allocations after construction.

use crate::measurement::{FailureCause, MeasurementResult};
use serde::Serialize;
use std::time::Duration;

/// Measurement statistics with a ring buffer of echo widths.
#[derive(Debug)]
pub struct RangeMetrics {
    /// Ring buffer of echo widths in microseconds (readings only).
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples collected (saturates at buffer size).
    sample_count: usize,
    /// Successful readings.
    readings: u64,
    /// Failures caused by the echo timeout.
    timeouts: u64,
    /// Failures caused by an unresolved cycle at inspection time.
    stale_reads: u64,
    /// Failures caused by a non-positive edge pair.
    invalid_durations: u64,
    /// Minimum observed echo width.
    min_us: u64,
    /// Maximum observed echo width.
    max_us: u64,
    /// Sum of echo widths for mean calculation.
    sum_us: u64,
    /// Distance of the most recent reading.
    last_distance_cm: Option<f64>,
}

impl RangeMetrics {
    /// Create a new metrics collector retaining `histogram_size` echo samples.
    #[must_use]
    pub fn new(histogram_size: usize) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            readings: 0,
            timeouts: 0,
            stale_reads: 0,
            invalid_durations: 0,
            min_us: u64::MAX,
            max_us: 0,
            sum_us: 0,
            last_distance_cm: None,
        }
    }

    /// Record the result of one cycle.
    pub fn record(&mut self, result: &MeasurementResult) {
        match *result {
            MeasurementResult::Reading {
                distance_cm,
                echo_us,
            } => {
                self.samples[self.write_pos] = echo_us;
                self.write_pos = (self.write_pos + 1) % self.samples.len();
                self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

                self.readings += 1;
                self.min_us = self.min_us.min(echo_us);
                self.max_us = self.max_us.max(echo_us);
                self.sum_us = self.sum_us.wrapping_add(echo_us);
                self.last_distance_cm = Some(distance_cm);
            }
            MeasurementResult::Failure { cause } => match cause {
                FailureCause::EchoTimeout => self.timeouts += 1,
                FailureCause::StaleRead => self.stale_reads += 1,
                FailureCause::InvalidDuration => self.invalid_durations += 1,
            },
        }
    }

    /// Total cycles recorded.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.readings + self.failures()
    }

    /// Successful readings.
    #[must_use]
    pub fn readings(&self) -> u64 {
        self.readings
    }

    /// Failed cycles of any cause.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.timeouts + self.stale_reads + self.invalid_durations
    }

    /// Failed cycles of one cause.
    #[must_use]
    pub fn failures_by(&self, cause: FailureCause) -> u64 {
        match cause {
            FailureCause::EchoTimeout => self.timeouts,
            FailureCause::StaleRead => self.stale_reads,
            FailureCause::InvalidDuration => self.invalid_durations,
        }
    }

    /// Shortest echo observed.
    #[must_use]
    pub fn min_echo(&self) -> Option<Duration> {
        (self.readings > 0).then(|| Duration::from_micros(self.min_us))
    }

    /// Longest echo observed.
    #[must_use]
    pub fn max_echo(&self) -> Option<Duration> {
        (self.readings > 0).then(|| Duration::from_micros(self.max_us))
    }

    /// Mean echo width.
    #[must_use]
    pub fn mean_echo(&self) -> Option<Duration> {
        (self.readings > 0).then(|| Duration::from_micros(self.sum_us / self.readings))
    }

    /// Distance of the most recent reading.
    #[must_use]
    pub fn last_distance_cm(&self) -> Option<f64> {
        self.last_distance_cm
    }

    /// Compute an echo-width percentile from the ring buffer.
    ///
    /// Returns `None` if no readings have been collected or if `percentile`
    /// is outside 0.0..=100.0.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }
        let sorted = self.sorted_samples();
        Some(Duration::from_micros(pick(&sorted, percentile)))
    }

    fn sorted_samples(&self) -> Vec<u64> {
        let mut sorted = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();
        sorted
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let sorted = self.sorted_samples();
        let (p50_echo_us, p99_echo_us) = if sorted.is_empty() {
            (None, None)
        } else {
            (Some(pick(&sorted, 50.0)), Some(pick(&sorted, 99.0)))
        };

        MetricsSnapshot {
            total_cycles: self.total_cycles(),
            readings: self.readings,
            timeouts: self.timeouts,
            stale_reads: self.stale_reads,
            invalid_durations: self.invalid_durations,
            min_echo_us: (self.readings > 0).then_some(self.min_us),
            max_echo_us: (self.readings > 0).then_some(self.max_us),
            mean_echo_us: (self.readings > 0).then(|| self.sum_us / self.readings),
            p50_echo_us,
            p99_echo_us,
            last_distance_cm: self.last_distance_cm,
            sample_count: self.sample_count,
        }
    }

    /// Reset all metrics to initial state.
    pub fn reset(&mut self) {
        self.samples.fill(0);
        self.write_pos = 0;
        self.sample_count = 0;
        self.readings = 0;
        self.timeouts = 0;
        self.stale_reads = 0;
        self.invalid_durations = 0;
        self.min_us = u64::MAX;
        self.max_us = 0;
        self.sum_us = 0;
        self.last_distance_cm = None;
    }
}

/// Nearest-rank percentile of a sorted, non-empty slice.
fn pick(sorted: &[u64], percentile: f64) -> u64 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Immutable snapshot of metrics for reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    /// Total cycles recorded.
    pub total_cycles: u64,
    /// Successful readings.
    pub readings: u64,
    /// Echo timeouts.
    pub timeouts: u64,
    /// Stale reads.
    pub stale_reads: u64,
    /// Invalid edge pairs.
    pub invalid_durations: u64,
    /// Shortest echo in microseconds.
    pub min_echo_us: Option<u64>,
    /// Longest echo in microseconds.
    pub max_echo_us: Option<u64>,
    /// Mean echo in microseconds.
    pub mean_echo_us: Option<u64>,
    /// Median echo over the retained samples, in microseconds.
    pub p50_echo_us: Option<u64>,
    /// 99th percentile echo over the retained samples, in microseconds.
    pub p99_echo_us: Option<u64>,
    /// Distance of the most recent reading.
    pub last_distance_cm: Option<f64>,
    /// Number of samples in the histogram.
    pub sample_count: usize,
}

impl MetricsSnapshot {
    /// Fraction of cycles that produced a reading, in 0.0..=1.0.
    #[must_use]
    pub fn success_ratio(&self) -> Option<f64> {
        #[allow(clippy::cast_precision_loss)]
        let ratio = (self.total_cycles > 0).then(|| self.readings as f64 / self.total_cycles as f64);
        ratio
    }
}
