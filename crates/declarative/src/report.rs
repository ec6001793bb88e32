//! Execution records and run reports - the audit trail of a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StepError;
use crate::step::StepId;
use crate::types::{FailurePolicy, StepStatus};

/// Why a step never ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// An upstream step failed or was skipped
    PreconditionUnsatisfied { upstream: StepId },
    /// Scheduling stopped after `failed` failed (fail-fast)
    Aborted { failed: StepId },
    /// The run was cancelled before the step was dispatched
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreconditionUnsatisfied { upstream } => {
                write!(f, "precondition '{upstream}' did not succeed")
            }
            Self::Aborted { failed } => write!(f, "run aborted after '{failed}' failed"),
            Self::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// Per-step audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub step_id: StepId,
    pub description: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Captured remote output
    pub output: String,
    pub error: Option<StepError>,
    pub skip_reason: Option<SkipReason>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    /// Set when a compensating action was attempted and failed
    pub rollback_error: Option<StepError>,
}

impl ExecutionRecord {
    pub(crate) fn pending(step_id: StepId, description: String) -> Self {
        Self {
            step_id,
            description,
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            output: String::new(),
            error: None,
            skip_reason: None,
            rolled_back_at: None,
            rollback_error: None,
        }
    }

    /// Wall time between running and the terminal transition
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }

    /// Last `lines` lines of captured output (or of the failure output)
    pub fn output_tail(&self, lines: usize) -> String {
        let text = self
            .error
            .as_ref()
            .and_then(StepError::output)
            .unwrap_or(&self.output);
        let all: Vec<&str> = text.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// The immutable result of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    status: RunStatus,
    cancelled: bool,
    policy: FailurePolicy,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    records: Vec<ExecutionRecord>,
    completion_order: Vec<StepId>,
}

impl RunReport {
    pub(crate) fn new(
        policy: FailurePolicy,
        cancelled: bool,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        records: Vec<ExecutionRecord>,
        completion_order: Vec<StepId>,
    ) -> Self {
        let failed = records.iter().any(|r| r.status == StepStatus::Failed);
        let status = if failed || cancelled {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };
        Self {
            status,
            cancelled,
            policy,
            started_at,
            finished_at,
            records,
            completion_order,
        }
    }

    /// Report for a plan with nothing to do
    pub fn empty(policy: FailurePolicy) -> Self {
        let now = Utc::now();
        Self::new(policy, false, now, now, Vec::new(), Vec::new())
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Records in plan order
    pub fn records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    pub fn record(&self, id: &str) -> Option<&ExecutionRecord> {
        self.records.iter().find(|r| r.step_id == id)
    }

    /// Steps in the order their apply finished successfully
    pub fn completion_order(&self) -> &[StepId] {
        &self.completion_order
    }

    /// Number of records with `status`
    pub fn count(&self, status: StepStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records
            .iter()
            .filter(|r| r.status == StepStatus::Failed || r.rollback_error.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_tail_prefers_failure_output() {
        let mut record = ExecutionRecord::pending("clone-repo".into(), "Clone".into());
        record.output = "ignored".into();
        record.error = Some(StepError::CommandFailed {
            exit_code: 128,
            output: "line1\nline2\nline3".into(),
        });
        assert_eq!(record.output_tail(2), "line2\nline3");
    }

    #[test]
    fn test_cancelled_run_is_failed() {
        let now = Utc::now();
        let report = RunReport::new(FailurePolicy::FailFast, true, now, now, Vec::new(), Vec::new());
        assert_eq!(report.status(), RunStatus::Failed);
        assert!(RunReport::empty(FailurePolicy::FailFast).is_success());
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = RunReport::empty(FailurePolicy::BestEffort);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"status\":\"succeeded\""));
        assert!(json.contains("\"policy\":\"best-effort\""));
    }
}
