//! Connection, apply context and provider traits
//!
//! These traits allow the declarative crate to be used without
//! depending on a specific transport (ssh, local shell) or UI.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{ConnectionError, StepError};
use crate::report::{ExecutionRecord, RunReport};
use crate::types::CommandOutput;

/// A shell command to run on the target host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    /// Shell command line, interpreted by `sh -c` on the target
    pub command: String,
    /// Run as this user (via sudo -u)
    pub as_user: Option<String>,
    /// Run with elevated privileges
    pub sudo: bool,
    /// Working directory on the target
    pub cwd: Option<String>,
    /// Don't echo output to the operator (it is still captured)
    pub suppress_output: bool,
    /// Kill the command after this long
    pub timeout: Option<Duration>,
}

impl RemoteCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            as_user: None,
            sudo: false,
            cwd: None,
            suppress_output: false,
            timeout: None,
        }
    }

    /// Run with elevated privileges
    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    /// Run as `user` (implies elevated privileges to switch user)
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.as_user = Some(user.into());
        self
    }

    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn quiet(mut self) -> Self {
        self.suppress_output = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Executes commands on a target host
///
/// Implementations must be safe to call from several worker threads at
/// once; the executor never runs more than `jobs` commands concurrently.
pub trait Connection: Send + Sync {
    /// Host this connection talks to, for display
    fn host(&self) -> &str;

    /// Run a command, returning its exit status and captured output
    fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, ConnectionError>;

    /// Run a command and turn a non-zero exit into `StepError::CommandFailed`
    fn run_checked(&self, command: &RemoteCommand) -> Result<CommandOutput, StepError> {
        let output = self.run(command)?;
        if output.success() {
            Ok(output)
        } else {
            Err(StepError::CommandFailed {
                exit_code: output.exit_code,
                output: output.combined(),
            })
        }
    }
}

impl<C: Connection + ?Sized> Connection for Arc<C> {
    fn host(&self) -> &str {
        (**self).host()
    }

    fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, ConnectionError> {
        (**self).run(command)
    }
}

/// Context passed to step apply and rollback operations
pub struct ApplyContext<'a> {
    /// Connection to the target host
    pub connection: &'a dyn Connection,
    /// Timeout applied to commands that don't set their own
    pub timeout: Option<Duration>,
    /// Whether to output verbose information
    pub verbose: bool,
}

impl<'a> ApplyContext<'a> {
    pub fn new(connection: &'a dyn Connection) -> Self {
        Self {
            connection,
            timeout: None,
            verbose: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run a command, failing on non-zero exit
    pub fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, StepError> {
        self.connection.run_checked(&self.bounded(command))
    }

    /// Run a command and hand back the output whatever the exit code
    pub fn run_unchecked(&self, command: &RemoteCommand) -> Result<CommandOutput, StepError> {
        Ok(self.connection.run(&self.bounded(command))?)
    }

    fn bounded(&self, command: &RemoteCommand) -> RemoteCommand {
        let mut command = command.clone();
        if command.timeout.is_none() {
            command.timeout = self.timeout;
        }
        command
    }
}

/// Run-level cancellation flag shared between the caller and the executor
///
/// Checked between step dispatches; in-flight steps are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Progress callback for execution operations
///
/// All callbacks are invoked from the executor's coordinating thread.
pub trait ProgressCallback: Send {
    /// Called once before the first dispatch
    fn on_run_start(&mut self, total: usize);

    /// Called when a step transitions to running
    fn on_step_start(&mut self, id: &str, description: &str);

    /// Called when a step reaches a terminal status
    fn on_step_complete(&mut self, record: &ExecutionRecord);

    /// Called when a succeeded step is about to be rolled back
    fn on_rollback(&mut self, id: &str);

    /// Called once the run has terminated
    fn on_run_complete(&mut self, report: &RunReport);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_step_start(&mut self, _id: &str, _description: &str) {}
    fn on_step_complete(&mut self, _record: &ExecutionRecord) {}
    fn on_rollback(&mut self, _id: &str) {}
    fn on_run_complete(&mut self, _report: &RunReport) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Connection for Echo {
        fn host(&self) -> &str {
            "echo"
        }

        fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, ConnectionError> {
            if command.command.starts_with("false") {
                return Ok(CommandOutput::failed(1, "nope"));
            }
            let timeout = command
                .timeout
                .map(|t| t.as_secs().to_string())
                .unwrap_or_default();
            Ok(CommandOutput::ok(timeout))
        }
    }

    #[test]
    fn test_run_checked_maps_exit_code() {
        let err = Echo.run_checked(&RemoteCommand::new("false")).unwrap_err();
        assert_eq!(
            err,
            StepError::CommandFailed {
                exit_code: 1,
                output: "nope".into()
            }
        );
    }

    #[test]
    fn test_context_applies_default_timeout() {
        let ctx = ApplyContext::new(&Echo).with_timeout(Some(Duration::from_secs(30)));
        let out = ctx.run(&RemoteCommand::new("true")).unwrap();
        assert_eq!(out.stdout, "30");

        let own = RemoteCommand::new("true").with_timeout(Duration::from_secs(5));
        assert_eq!(ctx.run(&own).unwrap().stdout, "5");
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
