use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use declarative::FailurePolicy;
use std::path::PathBuf;

use crate::operation::Operation;
use crate::profile::Environment;

#[derive(Parser)]
#[command(name = "foreman")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative, dependency-ordered deployment of web application instances", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $FOREMAN_CONFIG, ./foreman.toml, ./foreman.<env>.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the site user, home directory, virtualenv and SSH key
    Setup(RunArgs),

    /// Clone the project, install dependencies and link configs
    Bootstrap(RunArgs),

    /// Pull the latest revision of the project
    Deploy(RunArgs),

    /// Remove the checkout and clone it again
    Redeploy(RunArgs),

    /// Stop the service and remove everything setup created
    Destroy(RunArgs),

    /// Install Python dependencies into the virtualenv
    #[command(alias = "install_mods")]
    InstallMods(RunArgs),

    /// Install the project's crontab
    #[command(alias = "install_crontab")]
    InstallCrontab(RunArgs),

    /// Link the nginx site config
    #[command(alias = "link_nginx")]
    LinkNginx(RunArgs),

    /// Unlink the nginx site config
    #[command(alias = "unlink_nginx")]
    UnlinkNginx(RunArgs),

    /// Install the service init config
    #[command(alias = "link_init")]
    LinkInit(RunArgs),

    /// Remove the service init config
    #[command(alias = "unlink_init")]
    UnlinkInit(RunArgs),

    /// Start the service
    Start(RunArgs),

    /// Stop the service
    Stop(RunArgs),

    /// Restart the service
    Restart(RunArgs),

    /// Remove the checkout so the site can be bootstrapped again
    #[command(alias = "remove_app")]
    RemoveApp(RunArgs),

    /// Reload nginx
    #[command(alias = "reload_nginx", alias = "nginx")]
    ReloadNginx(RunArgs),

    /// Show what an operation would run, without running it
    Plan {
        /// Operation to plan (e.g. bootstrap, install_mods)
        operation: Operation,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Print the site user's public SSH key
    #[command(alias = "show_key")]
    ShowKey(TargetArgs),

    /// Inspect the application's log files
    #[command(subcommand)]
    Logs(LogsCommand),

    /// Run a management command of the application
    Manage(ManageArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Command {
    /// The plan operation this subcommand runs, if it is one
    pub fn operation(&self) -> Option<(Operation, &RunArgs)> {
        let op = match self {
            Self::Setup(a) => (Operation::Setup, a),
            Self::Bootstrap(a) => (Operation::Bootstrap, a),
            Self::Deploy(a) => (Operation::Deploy, a),
            Self::Redeploy(a) => (Operation::Redeploy, a),
            Self::Destroy(a) => (Operation::Destroy, a),
            Self::InstallMods(a) => (Operation::InstallMods, a),
            Self::InstallCrontab(a) => (Operation::InstallCrontab, a),
            Self::LinkNginx(a) => (Operation::LinkNginx, a),
            Self::UnlinkNginx(a) => (Operation::UnlinkNginx, a),
            Self::LinkInit(a) => (Operation::LinkInit, a),
            Self::UnlinkInit(a) => (Operation::UnlinkInit, a),
            Self::Start(a) => (Operation::Start, a),
            Self::Stop(a) => (Operation::Stop, a),
            Self::Restart(a) => (Operation::Restart, a),
            Self::RemoveApp(a) => (Operation::RemoveApp, a),
            Self::ReloadNginx(a) => (Operation::ReloadNginx, a),
            _ => return None,
        };
        Some(op)
    }
}

/// Which environment of the configured site to act on
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Target environment (development, staging, production)
    #[arg(value_enum)]
    pub environment: Environment,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Maximum number of independent steps run at once
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// What to do once a step fails: fail-fast, best-effort, rollback-on-failure
    #[arg(long)]
    pub policy: Option<FailurePolicy>,

    /// Per-step timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Log commands instead of running them
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Confirm destructive operations without prompting
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Subcommand)]
pub enum LogsCommand {
    /// List the files in the logs directory
    List(TargetArgs),

    /// Show the last lines of a log file
    Tail {
        #[command(flatten)]
        target: TargetArgs,

        /// Log name, e.g. `pip` for logs/pip.log
        name: String,

        /// Number of lines
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },

    /// Empty a log file
    Clear {
        #[command(flatten)]
        target: TargetArgs,

        /// Log name, e.g. `pip` for logs/pip.log
        name: String,

        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ManageArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Management command, e.g. `migrate`
    pub command: String,

    /// Arguments passed through to the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
