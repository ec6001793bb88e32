//! # Declarative
//!
//! A framework for planning and executing dependency-ordered steps against
//! a remote host.
//!
//! This crate provides the core abstractions for describing the steps an
//! operation needs, pruning the ones the host already satisfies, and
//! running the rest on a bounded worker pool under a failure policy.
//!
//! ## Core Concepts
//!
//! - **Step**: A unit of remote work with a check, an apply and an optional rollback
//! - **PlanGraph**: Steps plus the preconditions between them, kept acyclic
//! - **ObservedState**: Facts about the host, keyed by resource
//! - **Reconciliation**: A template graph pruned against observed state
//! - **Executor**: Runs a graph and produces a [`RunReport`]
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     ApplyContext, CheckOutcome, ExecuteOptions, ObservedState, PlanGraph,
//!     RemoteCommand, Step, StepError, execute_simple, prune,
//! };
//!
//! #[derive(Debug)]
//! struct MakeDir(String);
//!
//! impl Step for MakeDir {
//!     fn id(&self) -> String { format!("mkdir:{}", self.0) }
//!     fn description(&self) -> String { format!("Create {}", self.0) }
//!
//!     fn check(&self, observed: &ObservedState) -> CheckOutcome {
//!         match observed.get(&format!("dir:{}", self.0)) {
//!             Some(s) if s.is_present() => CheckOutcome::Satisfied,
//!             Some(_) => CheckOutcome::Unsatisfied,
//!             None => CheckOutcome::Unknown,
//!         }
//!     }
//!
//!     fn apply(&self, ctx: &ApplyContext<'_>) -> Result<String, StepError> {
//!         let out = ctx.run(&RemoteCommand::new(format!("mkdir -p {}", self.0)))?;
//!         Ok(out.combined())
//!     }
//! }
//!
//! let mut graph = PlanGraph::new();
//! graph.add(MakeDir("/srv/site".into()), &[])?;
//!
//! let plan = prune(graph, &ObservedState::new())?;
//! let report = execute_simple(plan.graph, connection, &ExecuteOptions::default())?;
//! ```
//!
//! ## Provider Traits
//!
//! - [`Connection`]: Runs commands on the target host
//! - [`ProgressCallback`]: Receives progress updates
//!
//! This keeps the crate free of any particular transport or UI.

pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod reconcile;
pub mod report;
pub mod state;
pub mod step;
pub mod types;

// Re-export main types at crate root
pub use context::{
    ApplyContext, CancellationToken, Connection, NoProgress, ProgressCallback, RemoteCommand,
};
pub use error::{ConnectionError, ExecuteError, GraphError, StepError};
pub use executor::{execute, execute_simple};
pub use graph::{PlanGraph, PlannedStep};
pub use reconcile::{Reconciliation, observe_run, prune};
pub use report::{ExecutionRecord, RunReport, RunStatus, SkipReason};
pub use state::ObservedState;
pub use step::{SharedStep, Step, StepId};
pub use types::{
    CheckOutcome, CommandOutput, ExecuteOptions, FailurePolicy, ResourceState, StepStatus,
};
