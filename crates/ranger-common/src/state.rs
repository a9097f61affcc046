//! Cycle phase state machine for the measurement controller.
//!
//! Each measurement cycle walks IDLE → ARMED → REPORTING → IDLE.
//! ARMED → IDLE is only taken when the trigger line could not be driven and
//! the cycle is abandoned before any result exists.

use crate::error::{RangerError, RangerResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phases of one measurement cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CyclePhase {
    /// Waiting for the next cadence tick.
    #[default]
    Idle,
    /// Trigger fired; waiting out the settle delay.
    Armed,
    /// Settle delay elapsed; the published echo state is being inspected.
    Reporting,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Armed => write!(f, "ARMED"),
            Self::Reporting => write!(f, "REPORTING"),
        }
    }
}

impl CyclePhase {
    /// Check if a transition to `target` is valid from the current phase.
    #[must_use]
    pub fn can_transition_to(&self, target: CyclePhase) -> bool {
        use CyclePhase::{Armed, Idle, Reporting};

        matches!(
            (self, target),
            (Idle, Armed)
                | (Armed, Reporting)
                | (Reporting, Idle)
                // Trigger failure: abandon the cycle
                | (Armed, Idle)
        )
    }

    /// Returns true while a cycle is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Phase machine with transition history tracking.
#[derive(Debug, Clone, Default)]
pub struct PhaseMachine {
    current: CyclePhase,
    previous: Option<CyclePhase>,
    transition_count: u64,
}

impl PhaseMachine {
    /// Create a new machine starting in IDLE.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current phase.
    #[must_use]
    pub fn phase(&self) -> CyclePhase {
        self.current
    }

    /// Get the previous phase (if any transition occurred).
    #[must_use]
    pub fn previous_phase(&self) -> Option<CyclePhase> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a phase transition.
    ///
    /// # Errors
    ///
    /// Returns [`RangerError::InvalidStateTransition`] if `target` is not
    /// reachable from the current phase; the phase is left unchanged.
    pub fn transition(&mut self, target: CyclePhase) -> RangerResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(RangerError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Abandon an armed cycle and return to IDLE.
    ///
    /// No-op from any phase other than ARMED.
    pub fn abort(&mut self) {
        if self.current == CyclePhase::Armed {
            self.previous = Some(self.current);
            self.current = CyclePhase::Idle;
            self.transition_count += 1;
        }
    }
}
