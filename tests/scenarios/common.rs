//! Common utilities for scenario tests.
//!
//! Provides a virtual-time rig: a cycle controller whose trigger pin is the
//! simulated sensor and whose delays advance the virtual alarm queue.

#![allow(dead_code)] // Not every scenario uses every helper

use ranger_common::config::RangerConfig;
use ranger_core::{
    ActiveFlag, CycleController, CycleReport, EdgeCapture, ManualClock, SimScript,
    SimulatedSensor, VirtualAlarms, VirtualDelay,
};
use ranger_common::time::duration_to_us;
use std::sync::Arc;

/// Controller type used by the virtual rig.
pub type VirtualController = CycleController<SimulatedSensor, VirtualDelay>;

/// A controller on a virtual timebase plus handles into its environment.
pub struct VirtualRig {
    /// Cycle controller under test.
    pub controller: VirtualController,
    /// Virtual alarm queue; advancing it moves time forward.
    pub alarms: Arc<VirtualAlarms>,
    /// Capture shared with the controller.
    pub capture: Arc<EdgeCapture>,
    /// Script for the simulated sensor's next responses.
    pub script: SimScript,
    /// Start/stop switch.
    pub active: ActiveFlag,
}

impl VirtualRig {
    /// Build a rig from `config`, starting at t = 0, inactive.
    pub fn new(config: &RangerConfig) -> Self {
        let clock = Arc::new(ManualClock::new(0));
        let alarms = Arc::new(VirtualAlarms::new(Arc::clone(&clock)));
        let capture = EdgeCapture::new(
            clock,
            alarms.clone(),
            duration_to_us(config.timing.echo_timeout),
        );
        let sensor = SimulatedSensor::new(Arc::clone(&capture), alarms.clone(), &config.simulation);
        let script = sensor.script();
        let active = ActiveFlag::new(false);

        let controller = CycleController::new(
            sensor,
            VirtualDelay::new(Arc::clone(&alarms)),
            Arc::clone(&capture),
            active.clone(),
            config,
        )
        .expect("controller should accept config");

        Self {
            controller,
            alarms,
            capture,
            script,
            active,
        }
    }

    /// Rig with the built-in defaults.
    pub fn with_defaults() -> Self {
        Self::new(&RangerConfig::default())
    }

    /// Current virtual time.
    pub fn now_us(&self) -> u64 {
        self.capture.now_us()
    }

    /// Poll the controller, advancing virtual time to the next due cycle
    /// first. Returns `None` while inactive.
    pub fn next_report(&mut self) -> Option<CycleReport> {
        let wait = self.controller.until_next_cycle()?;
        let wait_us = u64::try_from(wait.as_micros()).expect("wait fits in u64");
        self.alarms.advance(wait_us);
        self.controller.poll().expect("poll should succeed")
    }

    /// Poll repeatedly over `duration_us` of virtual time in steps of
    /// `step_us`, collecting every report.
    pub fn run_for(&mut self, duration_us: u64, step_us: u64) -> Vec<CycleReport> {
        let end_us = self.now_us() + duration_us;
        let mut reports = Vec::new();
        while self.now_us() < end_us {
            if let Some(report) = self.controller.poll().expect("poll should succeed") {
                reports.push(report);
            }
            self.alarms.advance(step_us);
        }
        reports
    }
}

/// Assert two distances agree to within `tolerance` centimetres.
pub fn assert_cm(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "distance {actual} cm not within {tolerance} of {expected} cm"
    );
}
