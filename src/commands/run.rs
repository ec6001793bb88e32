//! Run one operation end to end
//!
//! Load the profile, observe the host, prune the operation's template to
//! what is missing, execute it, and remember what the run left behind.

use anyhow::{Result, bail};
use colored::Colorize;
use declarative::{
    Connection, ExecuteOptions, ObservedState, RunReport, RunStatus, execute, observe_run,
};
use std::sync::Arc;
use std::time::Duration;

use crate::Context;
use crate::builder;
use crate::cli::RunArgs;
use crate::commands::{Target, load_target};
use crate::config::RunConfig;
use crate::connection::DryRunConnection;
use crate::facts;
use crate::journal::Journal;
use crate::operation::Operation;
use crate::reconcile::{self, ConfirmationToken};
use crate::report::{self, ConsoleProgress};
use crate::ui;

pub fn run(ctx: &Context, operation: Operation, args: &RunArgs) -> Result<RunStatus> {
    let environment = args.target.environment;
    let target = load_target(ctx, environment, operation.required_fields())?;
    let profile = &target.profile;
    let chatty = !ctx.quiet && !args.json;

    let token = if operation.is_destructive() {
        let token = ConfirmationToken::new(operation, profile);
        if !(args.yes || args.dry_run || prompt(&token)?) {
            bail!("{operation} not confirmed, nothing was changed");
        }
        Some(token)
    } else {
        None
    };

    let to_query = builder::facts(operation, profile, &target.config)?;

    let journal = Journal::open()?;
    let entry = journal.load(profile)?;
    log::info!("Querying {} fact(s) on {}", to_query.len(), profile.host);
    let observed = facts::observe(&to_query, target.connection.as_ref(), &entry.observed);

    let plan = reconcile::reconcile(
        operation,
        profile,
        &target.config,
        &observed,
        token.as_ref(),
    )?;
    if chatty {
        if let Some(path) = &target.config_path {
            ui::kv("config", &path.display().to_string());
        }
        report::print_plan(operation, &profile.host, &plan)?;
    }

    let opts = execute_options(args, &target.config.run, ctx.verbose > 0);
    let connection = apply_connection(&target, args.dry_run);
    let mut progress = if chatty {
        ConsoleProgress::new(ctx.verbose > 0)
    } else {
        ConsoleProgress::hidden()
    };

    let report = if plan.has_changes() {
        execute(plan.graph.clone(), connection, &opts, &mut progress)?
    } else {
        RunReport::empty(opts.policy)
    };
    let after = observe_run(&plan.graph, &report, &observed);

    if args.dry_run {
        log::info!("Dry run, journal left untouched");
    } else {
        record(&journal, &target, operation, &after, &report);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !ctx.quiet && plan.has_changes() {
        report::print_report(&report);
    }
    if args.dry_run && chatty {
        println!("{}", "Dry run: no command was run on the host".dimmed());
    }

    Ok(report.status())
}

fn prompt(token: &ConfirmationToken) -> Result<bool> {
    ui::warn(&format!(
        "{} removes data on {}",
        token.operation().to_string().bold(),
        token.target()
    ));
    ui::confirm("Continue?", false)
}

/// Queries always use the real host; a dry run only fakes the steps
fn apply_connection(target: &Target, dry_run: bool) -> Arc<dyn Connection> {
    if dry_run {
        Arc::new(DryRunConnection::new(target.profile.host.clone()))
    } else {
        Arc::clone(&target.connection)
    }
}

fn record(
    journal: &Journal,
    target: &Target,
    operation: Operation,
    after: &ObservedState,
    report: &RunReport,
) {
    // A run already happened; losing its journal entry only costs re-querying
    if let Err(e) = journal.record(&target.profile, operation, after, report) {
        log::warn!("Could not save journal: {e:#}");
        ui::warn("Run finished but its journal entry could not be saved");
    }
}

/// Executor options: CLI flags first, then the `[run]` table
pub fn execute_options(args: &RunArgs, config: &RunConfig, verbose: bool) -> ExecuteOptions {
    ExecuteOptions {
        jobs: args.jobs.unwrap_or(config.jobs).max(1),
        policy: args.policy.unwrap_or(config.policy),
        step_timeout: args
            .timeout
            .map(Duration::from_secs)
            .or_else(|| config.step_timeout()),
        verbose,
        ..ExecuteOptions::default()
    }
}
