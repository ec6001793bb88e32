use anyhow::Result;
use declarative::RemoteCommand;

use crate::Context;
use crate::cli::TargetArgs;
use crate::commands::{load_site, run_remote};
use crate::profile::ValidatedProfile;
use crate::steps::SSH_KEY;

fn show_key_command(profile: &ValidatedProfile) -> RemoteCommand {
    let public = format!("{}.pub", profile.home_path(SSH_KEY));
    RemoteCommand::new(format!("cat {public}"))
        .as_user(&profile.project_user)
        .quiet()
}

/// Print the site user's public key, e.g. to register as a deploy key
pub fn run(ctx: &Context, target: &TargetArgs) -> Result<()> {
    let site = load_site(ctx, target.environment)?;
    let output = run_remote(&site, &show_key_command(&site.profile))?;
    print!("{}", output.stdout);
    Ok(())
}
