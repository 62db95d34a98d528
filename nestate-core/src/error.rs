//! Error types for the state machine engine.

use thiserror::Error;

/// Errors returned by registry construction and machine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A state handle does not belong to the tree it was used with.
    #[error("unknown state id {id} for this tree")]
    UnknownState { id: usize },

    /// Adding a state would exceed the tree's configured depth limit.
    #[error("state depth {depth} exceeds configured maximum {max}")]
    MaxDepthExceeded { depth: usize, max: usize },

    /// A timer operation was attempted on a machine built without a backend.
    #[error("no timer backend configured for this machine")]
    NoTimerBackend,

    /// Timer periods must be at least one millisecond.
    #[error("timer period must be at least 1ms, got {millis}ms")]
    InvalidTimerPeriod { millis: u128 },

    /// The null event cannot be bound to a timer.
    #[error("cannot arm a timer with the null event")]
    NullTimerEvent,

    /// The backend refused to start a timer; the slot is left empty.
    #[error("timer backend failed to start: {reason}")]
    TimerBackendFailed { reason: String },
}

impl CoreError {
    /// Coarse error code, grouping variants the way callers branch on them.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::UnknownState { .. } => "INVALID_ARGUMENT",
            CoreError::MaxDepthExceeded { .. } => "MAX_DEPTH",
            CoreError::NoTimerBackend => "INVALID_ARGUMENT",
            CoreError::InvalidTimerPeriod { .. } => "INVALID_ARGUMENT",
            CoreError::NullTimerEvent => "INVALID_ARGUMENT",
            CoreError::TimerBackendFailed { .. } => "BACKEND_FAILURE",
        }
    }
}
