//! Simulated HC-SR04 sensor.
//!
//! [`SimulatedSensor`] is the trigger pin: when the controller drops the line
//! after a pulse, it schedules the echo edges on an [`AlarmService`] and
//! delivers them to the [`EdgeCapture`] stamped with the instant they
//! represent. With [`VirtualAlarms`](crate::alarm::VirtualAlarms) the whole
//! exchange is deterministic; with [`ThreadAlarms`](crate::alarm::ThreadAlarms)
//! it runs in real time.
//!
//! By default every trigger echoes the configured distance. A [`SimScript`]
//! queues specific responses (lost echoes, retriggers, late edges) for the
//! next triggers.

use crate::alarm::AlarmService;
use crate::capture::EdgeCapture;
use crate::distance::echo_us_for_distance;
use crate::edge::EdgeEvent;
use embedded_hal::digital::{ErrorType, OutputPin};
use ranger_common::config::SimulationConfig;
use ranger_common::time::duration_to_us;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Response of the simulated sensor to one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEcho {
    /// Normal echo pulse of `width_us`.
    Echo {
        /// Pulse width in microseconds.
        width_us: u64,
    },
    /// Rising edge only; the pulse never ends.
    Lost,
    /// No edges at all.
    Silent,
    /// Two rising edges `gap_us` apart, then a falling edge `width_us` after
    /// the second.
    DoubleRise {
        /// Time between the rising edges.
        gap_us: u64,
        /// Pulse width measured from the second rising edge.
        width_us: u64,
    },
    /// A falling edge with no pulse, then a normal echo of `width_us`.
    OrphanFall {
        /// Pulse width of the echo that follows.
        width_us: u64,
    },
}

impl SimEcho {
    /// Edge offsets relative to the echo start.
    fn edges(self) -> Vec<(u64, bool)> {
        match self {
            Self::Echo { width_us } => vec![(0, true), (width_us, false)],
            Self::Lost => vec![(0, true)],
            Self::Silent => Vec::new(),
            Self::DoubleRise { gap_us, width_us } => {
                vec![(0, true), (gap_us, true), (gap_us + width_us, false)]
            }
            Self::OrphanFall { width_us } => {
                vec![(0, false), (1, true), (1 + width_us, false)]
            }
        }
    }
}

/// Shared queue of scripted responses.
///
/// Clones share the queue, so a test can keep a handle after the sensor has
/// been moved into a controller.
#[derive(Debug, Clone, Default)]
pub struct SimScript(Arc<Mutex<VecDeque<SimEcho>>>);

impl SimScript {
    /// Empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for a future trigger.
    pub fn push(&self, echo: SimEcho) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(echo);
    }

    /// Queue several responses in order.
    pub fn extend(&self, echoes: impl IntoIterator<Item = SimEcho>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(echoes);
    }

    /// Responses not yet consumed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when no scripted responses remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pop(&self) -> Option<SimEcho> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

/// Trigger pin of a simulated sensor.
pub struct SimulatedSensor {
    capture: Arc<EdgeCapture>,
    alarms: Arc<dyn AlarmService>,
    script: SimScript,
    default_echo_us: u64,
    response_latency_us: u64,
    drop_every: u32,
    high_since_us: Option<u64>,
    triggers: u64,
    last_pulse_us: Option<u64>,
}

impl std::fmt::Debug for SimulatedSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedSensor")
            .field("default_echo_us", &self.default_echo_us)
            .field("response_latency_us", &self.response_latency_us)
            .field("triggers", &self.triggers)
            .finish_non_exhaustive()
    }
}

impl SimulatedSensor {
    /// Create a sensor echoing `config.distance_cm`.
    pub fn new(
        capture: Arc<EdgeCapture>,
        alarms: Arc<dyn AlarmService>,
        config: &SimulationConfig,
    ) -> Self {
        Self {
            capture,
            alarms,
            script: SimScript::new(),
            default_echo_us: echo_us_for_distance(config.distance_cm),
            response_latency_us: duration_to_us(config.response_latency),
            drop_every: config.drop_every,
            high_since_us: None,
            triggers: 0,
            last_pulse_us: None,
        }
    }

    /// Handle to the response script.
    #[must_use]
    pub fn script(&self) -> SimScript {
        self.script.clone()
    }

    /// Change the simulated target distance.
    pub fn set_distance_cm(&mut self, cm: f64) {
        self.default_echo_us = echo_us_for_distance(cm);
    }

    /// Triggers received so far.
    #[must_use]
    pub fn triggers(&self) -> u64 {
        self.triggers
    }

    /// Width of the most recent trigger pulse.
    #[must_use]
    pub fn last_pulse_us(&self) -> Option<u64> {
        self.last_pulse_us
    }

    fn next_echo(&self) -> SimEcho {
        if let Some(echo) = self.script.pop() {
            return echo;
        }
        if self.drop_every > 0 && self.triggers % u64::from(self.drop_every) == 0 {
            return SimEcho::Lost;
        }
        SimEcho::Echo {
            width_us: self.default_echo_us,
        }
    }

    fn respond(&mut self, trigger_end_us: u64) {
        self.triggers += 1;
        let echo = self.next_echo();
        let echo_start_us = trigger_end_us + self.response_latency_us;

        for (offset_us, rising) in echo.edges() {
            let at_us = echo_start_us + offset_us;
            let event = if rising {
                EdgeEvent::rising(at_us)
            } else {
                EdgeEvent::falling(at_us)
            };
            let capture = Arc::clone(&self.capture);
            let after_us = at_us.saturating_sub(self.capture.now_us());
            if let Err(e) = self
                .alarms
                .schedule(after_us, Box::new(move || capture.on_edge(event)))
            {
                warn!(error = %e, "Simulated echo edge dropped");
            }
        }
    }
}

impl ErrorType for SimulatedSensor {
    type Error = Infallible;
}

impl OutputPin for SimulatedSensor {
    fn set_high(&mut self) -> Result<(), Self::Error> {
        if self.high_since_us.is_none() {
            self.high_since_us = Some(self.capture.now_us());
        }
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        if let Some(since_us) = self.high_since_us.take() {
            let now_us = self.capture.now_us();
            self.last_pulse_us = Some(now_us.saturating_sub(since_us));
            self.respond(now_us);
        }
        Ok(())
    }
}
