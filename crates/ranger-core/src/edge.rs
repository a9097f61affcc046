//! Echo-line edges and level-to-edge classification.
//!
//! Interrupt-capable backends deliver [`EdgeEvent`]s directly. Backends that
//! only report the line level (or report both edges through one callback) run
//! the samples through an [`EdgeDetector`], built from the classic rising and
//! falling edge triggers:
//! - [`RTrig`] - true once on a low→high transition
//! - [`FTrig`] - true once on a high→low transition

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an echo-line transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    /// Low to high: the sensor started its echo pulse.
    Rising,
    /// High to low: the echo pulse ended.
    Falling,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rising => write!(f, "rising"),
            Self::Falling => write!(f, "falling"),
        }
    }
}

/// One timestamped transition of the echo line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEvent {
    /// Transition direction.
    pub edge: Edge,
    /// Monotonic timestamp in microseconds.
    pub at_us: u64,
}

impl EdgeEvent {
    /// Rising edge at `at_us`.
    #[must_use]
    pub fn rising(at_us: u64) -> Self {
        Self {
            edge: Edge::Rising,
            at_us,
        }
    }

    /// Falling edge at `at_us`.
    #[must_use]
    pub fn falling(at_us: u64) -> Self {
        Self {
            edge: Edge::Falling,
            at_us,
        }
    }
}

/// Rising edge trigger.
///
/// ```
/// use ranger_core::edge::RTrig;
///
/// let mut rtrig = RTrig::new();
/// assert!(!rtrig.call(false));
/// assert!(rtrig.call(true));
/// assert!(!rtrig.call(true));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RTrig {
    prev: bool,
}

impl RTrig {
    /// Create a trigger that has last seen a low level.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample; true if it completes a low→high transition.
    pub fn call(&mut self, level: bool) -> bool {
        let q = level && !self.prev;
        self.prev = level;
        q
    }

    /// Forget the previous level.
    pub fn reset(&mut self) {
        self.prev = false;
    }

    /// Previous level (for diagnostics).
    #[must_use]
    pub fn prev(&self) -> bool {
        self.prev
    }
}

/// Falling edge trigger.
#[derive(Debug, Clone, Default)]
pub struct FTrig {
    prev: bool,
}

impl FTrig {
    /// Create a trigger that has last seen a low level.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample; true if it completes a high→low transition.
    pub fn call(&mut self, level: bool) -> bool {
        let q = !level && self.prev;
        self.prev = level;
        q
    }

    /// Forget the previous level.
    pub fn reset(&mut self) {
        self.prev = false;
    }

    /// Previous level (for diagnostics).
    #[must_use]
    pub fn prev(&self) -> bool {
        self.prev
    }
}

/// Turns timestamped level samples into [`EdgeEvent`]s.
///
/// Repeated samples at the same level produce nothing, so a backend that
/// reports every interrupt with the current level never emits two rising
/// edges in a row.
#[derive(Debug, Clone, Default)]
pub struct EdgeDetector {
    rising: RTrig,
    falling: FTrig,
}

impl EdgeDetector {
    /// Create a detector assuming the line idles low.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the line level observed at `at_us`.
    pub fn sample(&mut self, level: bool, at_us: u64) -> Option<EdgeEvent> {
        let rose = self.rising.call(level);
        let fell = self.falling.call(level);
        match (rose, fell) {
            (true, _) => Some(EdgeEvent::rising(at_us)),
            (_, true) => Some(EdgeEvent::falling(at_us)),
            _ => None,
        }
    }

    /// Current believed line level.
    #[must_use]
    pub fn level(&self) -> bool {
        self.rising.prev()
    }

    /// Return to the idle-low assumption.
    pub fn reset(&mut self) {
        self.rising.reset();
        self.falling.reset();
    }
}
