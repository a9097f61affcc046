use thiserror::Error;

/// Ranger error types covering configuration, trigger output, alarms, and phase faults.
///
/// Measurement failures (echo timeout, stale reads) are not errors: they are
/// reported as [`crate::MeasurementResult::Failure`] values and the cycle
/// continues normally on the next tick.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RangerError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The trigger line could not be driven.
    #[error("trigger pin error: {0}")]
    Trigger(String),

    /// The alarm service is unavailable or failed to schedule a callback.
    #[error("alarm service error: {0}")]
    Alarm(String),

    /// Invalid cycle phase transition attempted.
    #[error("invalid phase transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source phase.
        from: String,
        /// Attempted target phase.
        to: String,
    },
}

/// Convenience type alias for ranger operations.
pub type RangerResult<T> = Result<T, RangerError>;
