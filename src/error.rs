//! Error types for the preemption controller.
//!
//! All errors are strongly typed using thiserror. The layering follows the
//! failure taxonomy of the controller:
//!
//! - stale references (a vehicle or junction vanished from the simulation) are
//!   recovered inside the control loop,
//! - transport failures abort the current tick and are surfaced to the run
//!   driver, which may reconnect,
//! - invariant violations are programming errors and are always fatal.

use thiserror::Error;

use crate::network::JunctionId;
use crate::storage::StorageError;
use crate::vehicle::VehicleId;

/// Validation errors for configuration and collaborator-provided input.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Detection radius {value} must be finite and positive")]
    InvalidDetectionRadius {
        value: f64,
    },

    #[error("Vehicle class name cannot be empty")]
    EmptyClassName,

    #[error("Vehicle class '{class}' has priority 0, which is reserved for normal traffic")]
    ZeroPriority {
        class: String,
    },

    #[error("Invalid signal colour '{found}' at link {index}")]
    InvalidSignalColor {
        found: char,
        index: usize,
    },

    #[error("Field '{field}' must be greater than zero")]
    MustBePositive {
        field: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors reported by the simulation collaborator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimulationError {
    #[error("Vehicle not found: {id}")]
    VehicleNotFound {
        id: VehicleId,
    },

    #[error("Junction not found: {id}")]
    JunctionNotFound {
        id: JunctionId,
    },

    #[error("Simulation connection lost: {message}")]
    Disconnected {
        message: String,
    },

    #[error("Command '{command}' rejected for junction {junction}: {reason}")]
    CommandRejected {
        command: String,
        junction: JunctionId,
        reason: String,
    },
}

impl SimulationError {
    /// Returns true if the error refers to an actor that no longer exists.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::VehicleNotFound { .. } | Self::JunctionNotFound { .. })
    }

    /// Returns true if the collaborator itself became unusable.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

/// Violations of the store invariants. Always fatal.
#[derive(Debug, Error)]
pub enum InvariantError {
    #[error("Preemption store out of sync for junction {junction}: {reason}")]
    StoreDesync {
        junction: JunctionId,
        reason: String,
    },

    #[error("Approach index {approach} out of range for junction {junction} ({links} controlled links)")]
    ApproachOutOfRange {
        junction: JunctionId,
        approach: usize,
        links: usize,
    },

    #[error("Signal state for junction {junction} has {actual} colours, expected {expected}")]
    StateLengthMismatch {
        junction: JunctionId,
        expected: usize,
        actual: usize,
    },
}

/// Top-level error type for the preemption controller.
#[derive(Debug, Error)]
pub enum PreemptError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invariant violated: {0}")]
    Invariant(#[from] InvariantError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl PreemptError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this error refers to a vanished vehicle or junction.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        match self {
            Self::Simulation(e) => e.is_stale(),
            _ => false,
        }
    }

    /// Returns true if the simulation connection was lost.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        match self {
            Self::Simulation(e) => e.is_transport(),
            _ => false,
        }
    }

    /// Returns true if this is an invariant violation.
    #[must_use]
    pub const fn is_invariant(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }

    /// Returns true if reconnecting to the simulation may clear the error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.is_transport()
    }

    /// Returns true if the run must stop with a diagnostic.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Invariant(_) | Self::Internal { .. })
    }
}

/// Result type alias for controller operations.
pub type PreemptResult<T> = Result<T, PreemptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_radius() {
        let err = ValidationError::InvalidDetectionRadius { value: -1.0 };
        let msg = format!("{err}");
        assert!(msg.contains("-1"));
        assert!(msg.contains("positive"));
    }

    #[test]
    fn test_simulation_error_classes() {
        let stale = SimulationError::VehicleNotFound {
            id: VehicleId::from("amb0"),
        };
        assert!(stale.is_stale());
        assert!(!stale.is_transport());

        let lost = SimulationError::Disconnected {
            message: "socket closed".to_string(),
        };
        assert!(lost.is_transport());
        assert!(!lost.is_stale());
        assert!(lost.to_string().contains("socket closed"));
    }

    #[test]
    fn test_preempt_error_from_simulation() {
        let err: PreemptError = SimulationError::JunctionNotFound {
            id: JunctionId::from("J1"),
        }
        .into();
        assert!(err.is_stale());
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_preempt_error_transport_is_retryable() {
        let err: PreemptError = SimulationError::Disconnected {
            message: "eof".to_string(),
        }
        .into();
        assert!(err.is_transport());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_invariant_is_fatal() {
        let err: PreemptError = InvariantError::StoreDesync {
            junction: JunctionId::from("J9"),
            reason: "record vanished mid-tick".to_string(),
        }
        .into();
        assert!(err.is_invariant());
        assert!(err.is_fatal());
        assert!(err.to_string().contains("J9"));
    }

    #[test]
    fn test_internal_error() {
        let err = PreemptError::internal("unexpected state");
        assert!(err.is_fatal());
        assert!(!err.is_validation());
        assert!(format!("{err}").contains("unexpected state"));
    }
}
