//! Measurement cycle controller.
//!
//! Each active cadence tick runs one cycle:
//! 1. IDLE → ARMED: start a new capture epoch, pulse the trigger line
//! 2. Wait out the settle delay (longer than the echo timeout)
//! 3. ARMED → REPORTING: take one snapshot of the echo record
//! 4. Convert it to a [`MeasurementResult`], record metrics
//! 5. REPORTING → IDLE
//!
//! The controller never inspects the record field by field and never starts
//! a cycle while the [`ActiveFlag`] is clear. Clearing the flag mid-cycle does
//! not abort the cycle in flight; its result is still returned.

use crate::capture::{EchoOutcome, EchoRecord, EdgeCapture};
use crate::distance::distance_cm;
use crate::edge::{FTrig, RTrig};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use ranger_common::config::{RangerConfig, TimingConfig};
use ranger_common::error::{RangerError, RangerResult};
use ranger_common::measurement::{FailureCause, MeasurementResult};
use ranger_common::metrics::RangeMetrics;
use ranger_common::state::{CyclePhase, PhaseMachine};
use ranger_common::time::{duration_to_us, duration_to_us_u32, Epoch};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Shared start/stop switch for the controller.
///
/// Cloning yields another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct ActiveFlag(Arc<AtomicBool>);

impl ActiveFlag {
    /// Create a flag with the given initial state.
    #[must_use]
    pub fn new(active: bool) -> Self {
        Self(Arc::new(AtomicBool::new(active)))
    }

    /// Enable or disable measuring. Takes effect at the next cadence tick.
    pub fn set_active(&self, active: bool) {
        self.0.store(active, Ordering::Release);
    }

    /// Current state.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of one executed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CycleReport {
    /// Cycle number, starting at 1.
    pub cycle: u64,
    /// Capture epoch the result was read from.
    pub epoch: Epoch,
    /// Cycle start on the capture timebase.
    pub started_at_us: u64,
    /// Distance or failure.
    pub result: MeasurementResult,
}

/// Drives the trigger line and turns echo records into results.
pub struct CycleController<P: OutputPin, D: DelayNs> {
    trigger: P,
    delay: D,
    capture: Arc<EdgeCapture>,
    active: ActiveFlag,
    timing: TimingConfig,
    phase: PhaseMachine,
    metrics: RangeMetrics,
    activated: RTrig,
    deactivated: FTrig,
    /// Start time of the next cycle while active.
    next_due_us: Option<u64>,
    cycle_count: u64,
}

impl<P: OutputPin, D: DelayNs> std::fmt::Debug for CycleController<P, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleController")
            .field("phase", &self.phase.phase())
            .field("active", &self.active.is_active())
            .field("cycle_count", &self.cycle_count)
            .field("next_due_us", &self.next_due_us)
            .finish_non_exhaustive()
    }
}

impl<P: OutputPin, D: DelayNs> CycleController<P, D> {
    /// Create a controller and drive the trigger line low.
    ///
    /// # Errors
    ///
    /// Returns [`RangerError::Config`] if the timing is inconsistent, or
    /// [`RangerError::Trigger`] if the trigger line cannot be driven.
    pub fn new(
        trigger: P,
        delay: D,
        capture: Arc<EdgeCapture>,
        active: ActiveFlag,
        config: &RangerConfig,
    ) -> RangerResult<Self> {
        config
            .timing
            .validate()
            .map_err(|e| RangerError::Config(e.to_string()))?;

        let mut controller = Self {
            trigger,
            delay,
            capture,
            active,
            timing: config.timing,
            phase: PhaseMachine::new(),
            metrics: RangeMetrics::new(config.metrics.histogram_size),
            activated: RTrig::new(),
            deactivated: FTrig::new(),
            next_due_us: None,
            cycle_count: 0,
        };
        controller.drive_trigger(false)?;

        debug!(
            pulse_us = controller.timing.trigger_pulse.as_micros(),
            settle_ms = controller.timing.settle_delay.as_millis(),
            cadence_ms = controller.timing.cadence.as_millis(),
            "Cycle controller ready"
        );
        Ok(controller)
    }

    /// Current phase.
    pub fn phase(&self) -> CyclePhase {
        self.phase.phase()
    }

    /// Measurement metrics.
    pub fn metrics(&self) -> &RangeMetrics {
        &self.metrics
    }

    /// Cycles started so far, including aborted ones.
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// The capture this controller reads from.
    pub fn capture(&self) -> &Arc<EdgeCapture> {
        &self.capture
    }

    /// Timing in effect.
    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Handle to the start/stop switch.
    pub fn active_flag(&self) -> ActiveFlag {
        self.active.clone()
    }

    /// Enable or disable measuring.
    pub fn set_active(&self, active: bool) {
        self.active.set_active(active);
    }

    /// Run a cycle if the controller is active and the cadence is due.
    ///
    /// The first poll after activation runs immediately; later cycles start
    /// one cadence after the previous cycle started, so the settle delay
    /// does not stretch the period.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`run_cycle`](Self::run_cycle).
    pub fn poll(&mut self) -> RangerResult<Option<CycleReport>> {
        let active = self.active.is_active();

        if self.activated.call(active) {
            info!("Measurement activated");
            self.next_due_us = None;
        }
        if self.deactivated.call(active) {
            info!(cycles = self.cycle_count, "Measurement paused");
            self.next_due_us = None;
        }
        if !active {
            return Ok(None);
        }

        let now_us = self.capture.now_us();
        match self.next_due_us {
            Some(due_us) if now_us < due_us => Ok(None),
            _ => self.run_cycle().map(Some),
        }
    }

    /// Time until the next cycle is due, `None` while inactive.
    pub fn until_next_cycle(&self) -> Option<Duration> {
        if !self.active.is_active() {
            return None;
        }
        let now_us = self.capture.now_us();
        Some(
            self.next_due_us
                .map_or(Duration::ZERO, |due| Duration::from_micros(due.saturating_sub(now_us))),
        )
    }

    /// Execute one measurement cycle regardless of the flag and cadence.
    ///
    /// Blocks for the trigger pulse plus the settle delay.
    ///
    /// # Errors
    ///
    /// Returns [`RangerError::Trigger`] if the trigger line fails (the cycle
    /// is abandoned and the controller returns to IDLE), or
    /// [`RangerError::InvalidStateTransition`] if called re-entrantly.
    pub fn run_cycle(&mut self) -> RangerResult<CycleReport> {
        self.phase.transition(CyclePhase::Armed)?;

        let started_at_us = self.capture.now_us();
        self.next_due_us = Some(started_at_us.saturating_add(duration_to_us(self.timing.cadence)));
        self.cycle_count += 1;
        let epoch = self.capture.begin_cycle();

        if let Err(e) = self.fire_trigger() {
            warn!(cycle = self.cycle_count, %epoch, error = %e, "Trigger failed, cycle abandoned");
            self.phase.abort();
            if let Err(park) = self.drive_trigger(false) {
                warn!(cycle = self.cycle_count, error = %park, "Failed to park trigger line after abort");
            }
            return Err(e);
        }

        self.delay
            .delay_us(duration_to_us_u32(self.timing.settle_delay));

        self.phase.transition(CyclePhase::Reporting)?;
        let record = self.capture.snapshot();
        let result = evaluate(&record, epoch);
        self.metrics.record(&result);
        self.phase.transition(CyclePhase::Idle)?;

        trace!(
            cycle = self.cycle_count,
            %epoch,
            outcome = ?record.outcome,
            ?result,
            "Cycle complete"
        );

        Ok(CycleReport {
            cycle: self.cycle_count,
            epoch,
            started_at_us,
            result,
        })
    }

    /// Drive the trigger line low and stop measuring.
    ///
    /// # Errors
    ///
    /// Returns [`RangerError::Trigger`] if the line cannot be driven.
    pub fn stop(&mut self) -> RangerResult<()> {
        info!(cycles = self.cycle_count, "Stopping cycle controller");
        self.active.set_active(false);
        self.next_due_us = None;
        self.drive_trigger(false)
    }

    fn fire_trigger(&mut self) -> RangerResult<()> {
        self.drive_trigger(true)?;
        self.delay
            .delay_us(duration_to_us_u32(self.timing.trigger_pulse));
        self.drive_trigger(false)
    }

    fn drive_trigger(&mut self, high: bool) -> RangerResult<()> {
        let outcome = if high {
            self.trigger.set_high()
        } else {
            self.trigger.set_low()
        };
        outcome.map_err(|e| {
            RangerError::Trigger(format!(
                "failed to drive trigger {}: {e:?}",
                if high { "high" } else { "low" }
            ))
        })
    }

    /// Consume the controller, returning the trigger pin and delay.
    pub fn into_parts(self) -> (P, D) {
        (self.trigger, self.delay)
    }
}

/// Turn an echo record into the result for cycle `epoch`.
#[must_use]
pub fn evaluate(record: &EchoRecord, epoch: Epoch) -> MeasurementResult {
    if record.epoch != epoch {
        return MeasurementResult::failure(FailureCause::StaleRead);
    }
    match record.outcome {
        EchoOutcome::Completed => match record.echo_us() {
            Some(echo_us) => MeasurementResult::Reading {
                distance_cm: distance_cm(echo_us),
                echo_us,
            },
            None => MeasurementResult::failure(FailureCause::InvalidDuration),
        },
        EchoOutcome::TimedOut => MeasurementResult::failure(FailureCause::EchoTimeout),
        EchoOutcome::Pending => MeasurementResult::failure(FailureCause::StaleRead),
    }
}

/// Builder for configuring the controller.
pub struct CycleControllerBuilder<P: OutputPin, D: DelayNs> {
    trigger: P,
    delay: D,
    capture: Arc<EdgeCapture>,
    active: ActiveFlag,
    config: RangerConfig,
}

impl<P: OutputPin, D: DelayNs> CycleControllerBuilder<P, D> {
    /// Start from the default configuration and an inactive flag.
    pub fn new(trigger: P, delay: D, capture: Arc<EdgeCapture>) -> Self {
        Self {
            trigger,
            delay,
            capture,
            active: ActiveFlag::default(),
            config: RangerConfig::default(),
        }
    }

    /// Use an existing start/stop flag.
    #[must_use]
    pub fn active_flag(mut self, active: ActiveFlag) -> Self {
        self.active = active;
        self
    }

    /// Set the cadence between cycle starts.
    #[must_use]
    pub fn cadence(mut self, cadence: Duration) -> Self {
        self.config.timing.cadence = cadence;
        self
    }

    /// Set the settle delay.
    #[must_use]
    pub fn settle_delay(mut self, settle: Duration) -> Self {
        self.config.timing.settle_delay = settle;
        self
    }

    /// Set the trigger pulse width.
    #[must_use]
    pub fn trigger_pulse(mut self, pulse: Duration) -> Self {
        self.config.timing.trigger_pulse = pulse;
        self
    }

    /// Set the full configuration.
    #[must_use]
    pub fn config(mut self, config: RangerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the controller.
    ///
    /// # Errors
    ///
    /// See [`CycleController::new`].
    pub fn build(self) -> RangerResult<CycleController<P, D>> {
        // The capture owns the echo timeout; keep the settle check honest.
        let mut config = self.config;
        config.timing.echo_timeout = Duration::from_micros(self.capture.echo_timeout_us());
        CycleController::new(self.trigger, self.delay, self.capture, self.active, &config)
    }
}
