//! Monotonic microsecond timebases.
//!
//! [`SystemClock`] measures from its own construction with `Instant`, the same
//! relative-timestamp scheme the watchdog uses. [`ManualClock`] only moves when
//! told to and drives deterministic simulations.

use ranger_common::time::duration_to_us;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of monotonic timestamps in microseconds.
pub trait MonotonicClock: Send + Sync {
    /// Microseconds since the clock's origin. Never decreases.
    fn now_us(&self) -> u64;
}

impl<C: MonotonicClock + ?Sized> MonotonicClock for Arc<C> {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }
}

/// Wall-time clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    #[inline]
    fn now_us(&self) -> u64 {
        duration_to_us(self.origin.elapsed())
    }
}

/// Virtual clock advanced explicitly.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start_us`.
    #[must_use]
    pub fn new(start_us: u64) -> Self {
        Self {
            now_us: AtomicU64::new(start_us),
        }
    }

    /// Move the clock forward to `us`. Earlier values are ignored.
    pub fn set(&self, us: u64) {
        self.now_us.fetch_max(us, Ordering::AcqRel);
    }

    /// Move the clock forward by `us` and return the new reading.
    pub fn advance(&self, us: u64) -> u64 {
        self.now_us.fetch_add(us, Ordering::AcqRel) + us
    }
}

impl MonotonicClock for ManualClock {
    #[inline]
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::Acquire)
    }
}
