//! Step trait for dependency-ordered provisioning
//!
//! A Step is an atomic, idempotent action: it can observe whether its
//! effect already holds, apply it, declare how it changes observed state,
//! and optionally compensate for it.

use std::fmt;
use std::sync::Arc;

use crate::context::ApplyContext;
use crate::error::StepError;
use crate::state::ObservedState;
use crate::types::CheckOutcome;

/// Identifier of a step, unique within one plan graph
pub type StepId = String;

/// Core trait for provisioning steps
///
/// # Example
///
/// ```ignore
/// use declarative::{ApplyContext, CheckOutcome, ObservedState, RemoteCommand, Step, StepError};
///
/// #[derive(Debug)]
/// struct CreateDir { path: String }
///
/// impl Step for CreateDir {
///     fn id(&self) -> String { "create-dir".into() }
///     fn description(&self) -> String { format!("Create {}", self.path) }
///
///     fn check(&self, observed: &ObservedState) -> CheckOutcome {
///         match observed.get(&format!("dir:{}", self.path)) {
///             Some(state) if state.is_present() => CheckOutcome::Satisfied,
///             Some(_) => CheckOutcome::Unsatisfied,
///             None => CheckOutcome::Unknown,
///         }
///     }
///
///     fn apply(&self, ctx: &ApplyContext) -> Result<String, StepError> {
///         let out = ctx.run(&RemoteCommand::new(format!("mkdir -p {}", self.path)).sudo())?;
///         Ok(out.combined())
///     }
///
///     fn effects(&self, observed: &mut ObservedState) {
///         observed.set(format!("dir:{}", self.path), declarative::ResourceState::present());
///     }
/// }
/// ```
pub trait Step: Send + Sync + fmt::Debug {
    /// Unique identifier, e.g. "clone-repo"
    fn id(&self) -> StepId;

    /// Human-readable description of what this step does
    fn description(&self) -> String;

    /// Observe whether the step's effect already holds
    ///
    /// Must not perform I/O; it only reads `observed`.
    fn check(&self, observed: &ObservedState) -> CheckOutcome;

    /// Apply the step through the context's connection
    ///
    /// Re-applying a step that already succeeded must leave the target in
    /// the same observed state. Returns the captured output.
    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<String, StepError>;

    /// Record how a successful apply changes observed state
    fn effects(&self, _observed: &mut ObservedState) {}

    /// Whether this step has a compensating action
    fn can_rollback(&self) -> bool {
        false
    }

    /// Undo a successful apply
    fn rollback(&self, _ctx: &ApplyContext<'_>) -> Result<String, StepError> {
        Ok(String::new())
    }
}

/// A shared, type-erased step
pub type SharedStep = Arc<dyn Step>;
