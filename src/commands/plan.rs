use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::builder;
use crate::cli::TargetArgs;
use crate::commands::load_target;
use crate::facts;
use crate::journal::Journal;
use crate::operation::Operation;
use crate::reconcile::{self, ConfirmationToken};
use crate::report;
use crate::ui;

/// Show the steps `operation` would run against the host as it is now
///
/// Only queries are sent to the host, so destructive operations are
/// planned without asking for confirmation.
pub fn run(ctx: &Context, operation: Operation, target: &TargetArgs) -> Result<()> {
    let site = load_target(ctx, target.environment, operation.required_fields())?;
    let profile = &site.profile;

    let to_query = builder::facts(operation, profile, &site.config)?;
    let journal = Journal::open()?;
    let entry = journal.load(profile)?;
    let observed = facts::observe(&to_query, site.connection.as_ref(), &entry.observed);

    let token = ConfirmationToken::new(operation, profile);
    let plan = reconcile::reconcile(operation, profile, &site.config, &observed, Some(&token))?;

    report::print_plan(operation, &profile.host, &plan)?;

    if !ctx.quiet {
        ui::section("Journal");
        ui::kv("target", &reconcile::target(profile));
        match (&entry.last_operation, entry.last_updated) {
            (Some(op), Some(at)) => ui::kv("last run", &format!("{op} at {}", at.to_rfc3339())),
            _ => ui::kv("last run", &"never".dimmed().to_string()),
        }
        if let Some(last) = journal.last_report(profile)? {
            ui::kv("outcome", &report::summary_line(&last));
        }
    }
    Ok(())
}
