use anyhow::Result;
use declarative::RemoteCommand;

use crate::Context;
use crate::cli::ManageArgs;
use crate::commands::{load_site, run_remote};
use crate::connection::quote;
use crate::profile::ValidatedProfile;

/// `<venv>/bin/python <project>/manage.py <command> <args...>`
fn manage_command(profile: &ValidatedProfile, command: &str, args: &[String]) -> RemoteCommand {
    let mut line = vec![
        profile.venv_bin("python"),
        profile.project_path("manage.py"),
        quote(command),
    ];
    line.extend(args.iter().map(|a| quote(a)));

    RemoteCommand::new(line.join(" "))
        .as_user(&profile.project_user)
        .in_dir(profile.project_dir())
}

pub fn run(ctx: &Context, args: &ManageArgs) -> Result<()> {
    let site = load_site(ctx, args.target.environment)?;
    let command = manage_command(&site.profile, &args.command, &args.args);
    log::info!("Running manage.py {} on {}", args.command, site.profile.host);

    let output = run_remote(&site, &command)?;
    print!("{}", output.stdout);
    if !output.stderr.is_empty() {
        eprint!("{}", output.stderr);
    }
    Ok(())
}
