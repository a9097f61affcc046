//! Software clock used to label output lines.
//!
//! Free-running: it starts at the configured time of day and advances with
//! the monotonic clock. It is never synchronised with wall time.

use ranger_common::time::TimeOfDay;
use std::time::{Duration, Instant};

/// Time-of-day label source.
#[derive(Debug, Clone, Copy)]
pub struct SoftwareClock {
    start: TimeOfDay,
    origin: Instant,
}

impl SoftwareClock {
    /// Start the clock at `start`, now.
    #[must_use]
    pub fn new(start: TimeOfDay) -> Self {
        Self::with_origin(start, Instant::now())
    }

    /// Start the clock at `start`, counting from `origin`.
    #[must_use]
    pub fn with_origin(start: TimeOfDay, origin: Instant) -> Self {
        Self { start, origin }
    }

    /// Label for a point `elapsed` after the clock started.
    #[must_use]
    pub fn label_at(&self, elapsed: Duration) -> TimeOfDay {
        self.start.plus_seconds(elapsed.as_secs())
    }

    /// Current label.
    #[must_use]
    pub fn now(&self) -> TimeOfDay {
        self.label_at(self.origin.elapsed())
    }
}
