//! Core types for dependency-ordered step execution

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::context::CancellationToken;

/// Observed state of a single fact on a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    /// Fact holds, optionally with a detail (symlink target, remote url, revision)
    Present { details: Option<String> },
    /// Fact does not hold
    Absent,
    /// Queried, but the query could not decide
    Unknown,
}

impl ResourceState {
    /// Present without details
    pub fn present() -> Self {
        Self::Present { details: None }
    }

    /// Present with a detail string
    pub fn present_with(details: impl Into<String>) -> Self {
        Self::Present {
            details: Some(details.into()),
        }
    }

    /// Check if state represents presence
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    /// Check if state represents absence
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Detail carried by a present state
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Present { details } => details.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present { details: Some(d) } => write!(f, "present ({d})"),
            Self::Present { details: None } => write!(f, "present"),
            Self::Absent => write!(f, "absent"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of checking a step against observed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckOutcome {
    /// The step's effect already holds; applying it would change nothing
    Satisfied,
    /// The step must run
    Unsatisfied,
    /// Not enough is known; the step is kept
    Unknown,
}

/// Lifecycle status of a step within one run
///
/// `Pending -> Running -> {Succeeded | Failed}`, `Pending -> Skipped`,
/// and `Succeeded -> RolledBack` under the rollback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    RolledBack,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::RolledBack
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::RolledBack => "rolled-back",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the executor does once a step fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop admitting newly unblocked steps; everything not yet runnable is skipped
    #[default]
    FailFast,
    /// Keep running every step whose preconditions succeeded
    BestEffort,
    /// Fail fast, then roll back succeeded steps in reverse completion order
    RollbackOnFailure,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailFast => "fail-fast",
            Self::BestEffort => "best-effort",
            Self::RollbackOnFailure => "rollback-on-failure",
        }
    }

    /// Whether newly unblocked steps are still admitted after a failure
    pub fn continues_after_failure(self) -> bool {
        matches!(self, Self::BestEffort)
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-fast" | "failfast" => Ok(Self::FailFast),
            "best-effort" | "besteffort" => Ok(Self::BestEffort),
            "rollback-on-failure" | "rollback" => Ok(Self::RollbackOnFailure),
            other => Err(format!(
                "unknown failure policy '{other}' (expected fail-fast, best-effort or rollback-on-failure)"
            )),
        }
    }
}

/// Options for one run of the executor
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum number of steps in flight against the connection
    pub jobs: usize,
    /// Failure policy
    pub policy: FailurePolicy,
    /// Per-step timeout; `None` waits indefinitely
    pub step_timeout: Option<Duration>,
    /// Run-level cancellation, checked between dispatches
    pub cancel: CancellationToken,
    /// Verbose output from steps
    pub verbose: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            policy: FailurePolicy::default(),
            step_timeout: None,
            cancel: CancellationToken::new(),
            verbose: false,
        }
    }
}

/// Output of one command run through a connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful command with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A command that exited with `exit_code`
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, trimmed
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!("fail-fast".parse(), Ok(FailurePolicy::FailFast));
        assert_eq!("Best-Effort".parse(), Ok(FailurePolicy::BestEffort));
        assert_eq!("rollback".parse(), Ok(FailurePolicy::RollbackOnFailure));
        assert!("retry".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(StepStatus::RolledBack.is_terminal());
    }

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            exit_code: 1,
            stdout: "cloning\n".into(),
            stderr: "fatal: repository not found\n".into(),
        };
        assert_eq!(out.combined(), "cloning\nfatal: repository not found");
        assert_eq!(CommandOutput::ok("").combined(), "");
    }
}
