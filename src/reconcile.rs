//! Reconciler
//!
//! Prunes an operation's template against what is observed on the target.
//! Destructive operations need a [`ConfirmationToken`] naming the exact
//! operation and target; how it is obtained (prompt, `--yes`) is up to the
//! caller.

use declarative::{GraphError, ObservedState, Reconciliation, prune};
use std::fmt;
use thiserror::Error;

use crate::builder::{BuildError, build};
use crate::config::Config;
use crate::operation::Operation;
use crate::profile::{ValidatedProfile, ValidationError};

/// Explicit consent to run a destructive operation against one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationToken {
    operation: Operation,
    target: String,
}

impl ConfirmationToken {
    pub fn new(operation: Operation, profile: &ValidatedProfile) -> Self {
        Self {
            operation,
            target: target(profile),
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn covers(&self, operation: Operation, profile: &ValidatedProfile) -> bool {
        self.operation == operation && self.target == target(profile)
    }
}

impl fmt::Display for ConfirmationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation, self.target)
    }
}

/// What a destructive operation acts on: `host:project_dir`
pub fn target(profile: &ValidatedProfile) -> String {
    format!("{}:{}", profile.host, profile.project_dir())
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("{operation} is destructive and needs confirmation for {target}")]
    ConfirmationRequired {
        operation: Operation,
        target: String,
    },

    #[error("confirmation was given for '{given}', not for {operation} {target}")]
    ConfirmationMismatch {
        operation: Operation,
        target: String,
        given: String,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid plan graph: {0}")]
    Graph(#[from] GraphError),
}

impl From<BuildError> for ReconcileError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::Validation(e) => Self::Validation(e),
            BuildError::Graph(e) => Self::Graph(e),
        }
    }
}

/// Fail unless `token` covers a destructive `operation` on this target
pub fn confirm(
    operation: Operation,
    profile: &ValidatedProfile,
    token: Option<&ConfirmationToken>,
) -> Result<(), ReconcileError> {
    if !operation.is_destructive() {
        return Ok(());
    }
    match token {
        Some(t) if t.covers(operation, profile) => Ok(()),
        Some(t) => Err(ReconcileError::ConfirmationMismatch {
            operation,
            target: target(profile),
            given: t.to_string(),
        }),
        None => Err(ReconcileError::ConfirmationRequired {
            operation,
            target: target(profile),
        }),
    }
}

/// Minimal plan moving the target from `observed` to `operation`'s goal
///
/// Destructive operations need a `token` covering this target.
pub fn reconcile(
    operation: Operation,
    profile: &ValidatedProfile,
    config: &Config,
    observed: &ObservedState,
    token: Option<&ConfirmationToken>,
) -> Result<Reconciliation, ReconcileError> {
    confirm(operation, profile, token)?;
    let template = build(operation, profile, config)?;
    let reconciliation = prune(template.graph, observed)?;
    log::debug!(
        "{}: {} step(s) to run, {} already satisfied",
        template.operation,
        reconciliation.graph.len(),
        reconciliation.pruned.len()
    );
    Ok(reconciliation)
}
