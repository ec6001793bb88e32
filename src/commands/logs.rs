use anyhow::{Result, bail};
use declarative::RemoteCommand;
use regex::Regex;
use std::sync::LazyLock;

use crate::Context;
use crate::cli::LogsCommand;
use crate::commands::{Target, load_site, run_remote};
use crate::profile::ValidatedProfile;
use crate::ui;

static LOG_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Path of `logs/<name>.log`, refusing names that would leave the directory
fn log_path(profile: &ValidatedProfile, name: &str) -> Result<String> {
    let name = name.strip_suffix(".log").unwrap_or(name);
    if !LOG_NAME_RE.is_match(name) || name.contains("..") {
        bail!("Invalid log name '{name}'");
    }
    Ok(profile.home_path(&format!("logs/{name}.log")))
}

fn as_site_user(profile: &ValidatedProfile, command: String) -> RemoteCommand {
    RemoteCommand::new(command)
        .as_user(&profile.project_user)
        .in_dir(&profile.home)
        .quiet()
}

fn list_command(profile: &ValidatedProfile) -> RemoteCommand {
    as_site_user(profile, "ls -la logs".to_string())
}

fn tail_command(profile: &ValidatedProfile, name: &str, lines: usize) -> Result<RemoteCommand> {
    let path = log_path(profile, name)?;
    Ok(as_site_user(profile, format!("tail -n {lines} {path}")))
}

fn clear_command(profile: &ValidatedProfile, name: &str) -> Result<RemoteCommand> {
    let path = log_path(profile, name)?;
    Ok(as_site_user(profile, format!(": > {path}")))
}

pub fn run(ctx: &Context, cmd: &LogsCommand) -> Result<()> {
    match cmd {
        LogsCommand::List(target) => {
            let site = load_site(ctx, target.environment)?;
            show(&site, &list_command(&site.profile))
        }
        LogsCommand::Tail {
            target,
            name,
            lines,
        } => {
            let site = load_site(ctx, target.environment)?;
            let command = tail_command(&site.profile, name, *lines)?;
            show(&site, &command)
        }
        LogsCommand::Clear { target, name, yes } => {
            let site = load_site(ctx, target.environment)?;
            let command = clear_command(&site.profile, name)?;
            let path = log_path(&site.profile, name)?;
            if !*yes && !ui::confirm(&format!("Empty {path} on {}?", site.profile.host), false)? {
                ui::info("Left as is");
                return Ok(());
            }
            run_remote(&site, &command)?;
            if !ctx.quiet {
                ui::success(&format!("Emptied {path}"));
            }
            Ok(())
        }
    }
}

fn show(site: &Target, command: &RemoteCommand) -> Result<()> {
    let output = run_remote(site, command)?;
    print!("{}", output.stdout);
    Ok(())
}
