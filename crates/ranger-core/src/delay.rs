//! `embedded-hal` delay providers for the cycle controller.
//!
//! [`HostDelay`] sleeps the calling thread with `spin_sleep`, which spins for
//! the last stretch of each wait so the 10 µs trigger pulse stays close to
//! its nominal width. [`VirtualDelay`] instead advances a [`VirtualAlarms`]
//! timeline, firing every alarm that falls due during the wait.

use crate::alarm::VirtualAlarms;
use embedded_hal::delay::DelayNs;
use spin_sleep::SpinSleeper;
use std::sync::Arc;
use std::time::Duration;

/// Native threshold below which `spin_sleep` spins instead of sleeping.
const SPIN_THRESHOLD_NS: u32 = 100_000;

/// Blocking delay on the host clock.
#[derive(Debug, Clone, Copy)]
pub struct HostDelay {
    sleeper: SpinSleeper,
}

impl HostDelay {
    /// Create a delay with the default spin threshold.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sleeper: SpinSleeper::new(SPIN_THRESHOLD_NS),
        }
    }
}

impl Default for HostDelay {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayNs for HostDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.sleeper.sleep(Duration::from_nanos(u64::from(ns)));
    }

    fn delay_us(&mut self, us: u32) {
        self.sleeper.sleep(Duration::from_micros(u64::from(us)));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.sleeper.sleep(Duration::from_millis(u64::from(ms)));
    }
}

/// Delay that moves virtual time instead of sleeping.
#[derive(Debug, Clone)]
pub struct VirtualDelay {
    alarms: Arc<VirtualAlarms>,
}

impl VirtualDelay {
    /// Create a delay advancing `alarms`.
    #[must_use]
    pub fn new(alarms: Arc<VirtualAlarms>) -> Self {
        Self { alarms }
    }
}

impl DelayNs for VirtualDelay {
    fn delay_ns(&mut self, ns: u32) {
        // Virtual time has microsecond resolution; round up so a wait is
        // never shorter than requested.
        self.alarms.advance(u64::from(ns).div_ceil(1_000));
    }

    fn delay_us(&mut self, us: u32) {
        self.alarms.advance(u64::from(us));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.alarms.advance(u64::from(ms) * 1_000);
    }
}
