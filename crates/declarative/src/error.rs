//! Error types for the declarative crate

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::step::StepId;

/// Errors raised by a connection while running a command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The transport to the host went away
    #[error("connection lost: {0}")]
    Lost(String),

    /// The command did not finish in time and was killed
    #[error("command timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    /// The command could not be started at all
    #[error("failed to spawn command: {0}")]
    Spawn(String),
}

/// Errors raised by a step's `apply()` or `rollback()`
///
/// Always attached to the step's execution record, never returned past the
/// executor.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepError {
    /// A command exited non-zero
    #[error("command failed with exit code {exit_code}")]
    CommandFailed { exit_code: i32, output: String },

    /// The step exceeded its timeout
    #[error("timed out after {}s", .after.as_secs())]
    TimedOut { after: Duration },

    /// The connection to the host was lost mid-step
    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// The step implementation panicked on its worker
    #[error("step panicked: {message}")]
    Panicked { message: String },
}

impl StepError {
    /// Remote output captured alongside the error, if any
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { output, .. } if !output.is_empty() => Some(output),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CommandFailed { .. } => "command-failed",
            Self::TimedOut { .. } => "timed-out",
            Self::ConnectionLost { .. } => "connection-lost",
            Self::Panicked { .. } => "panicked",
        }
    }
}

impl From<ConnectionError> for StepError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::TimedOut(after) => Self::TimedOut { after },
            ConnectionError::Lost(reason) | ConnectionError::Spawn(reason) => {
                Self::ConnectionLost { reason }
            }
        }
    }
}

/// Malformed plan graphs; these are programmer errors and fatal at build time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate step id: {0}")]
    DuplicateStep(StepId),

    #[error("step '{step}' depends on unknown step '{missing}'")]
    DanglingPrecondition { step: StepId, missing: StepId },

    #[error("cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<StepId>),
}

/// Errors that prevent a run from starting
#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("invalid plan graph: {0}")]
    InvalidGraph(#[from] GraphError),

    #[error("failed to create worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for graph operations
pub type Result<T, E = GraphError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_maps_to_step_error() {
        let timeout = ConnectionError::TimedOut(Duration::from_secs(5));
        assert_eq!(
            StepError::from(timeout),
            StepError::TimedOut {
                after: Duration::from_secs(5)
            }
        );

        let lost = ConnectionError::Lost("broken pipe".into());
        assert!(matches!(
            StepError::from(lost),
            StepError::ConnectionLost { .. }
        ));
    }

    #[test]
    fn test_cycle_display() {
        let err = GraphError::Cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "cycle detected: a -> b -> a");
    }
}
