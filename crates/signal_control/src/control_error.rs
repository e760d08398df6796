// ---------------------------------------------------------------------------
// ControlError: failures surfaced by controller lifecycle operations
// ---------------------------------------------------------------------------

use std::fmt;

use crate::telemetry::TelemetryError;

/// Errors returned by `start()` and other lifecycle calls.
///
/// Per-tick work never returns these: `step()` logs and skips instead.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlError {
    /// The simulator session is not loaded yet.
    ControllerNotReady,
    /// The simulator has no signalized junction with this id.
    UnknownJunction(String),
    /// The simulator reported a phase index outside the signal program.
    InvalidPhaseIndex(u8),
    /// A telemetry query failed while starting.
    Telemetry(TelemetryError),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::ControllerNotReady => write!(f, "Controller not ready: simulator is not live"),
            ControlError::UnknownJunction(id) => write!(f, "Unknown junction: {id}"),
            ControlError::InvalidPhaseIndex(index) => {
                write!(f, "Invalid phase index {index} in signal program")
            }
            ControlError::Telemetry(e) => write!(f, "Telemetry error: {e}"),
        }
    }
}

impl std::error::Error for ControlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControlError::Telemetry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TelemetryError> for ControlError {
    fn from(e: TelemetryError) -> Self {
        match e {
            TelemetryError::NotConnected => ControlError::ControllerNotReady,
            other => ControlError::Telemetry(other),
        }
    }
}
