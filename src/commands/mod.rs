// Plan operations
pub mod plan;
pub mod run;

// Site maintenance
pub mod logs;
pub mod manage;
pub mod ssh_key;

use anyhow::{Result, bail};
use declarative::{CommandOutput, Connection, RemoteCommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::Context;
use crate::config::Config;
use crate::connection;
use crate::profile::{Environment, Field, ValidatedProfile, validate};

/// Fields the maintenance commands need to find the site on its host
const SITE_FIELDS: [Field; 4] = [
    Field::Host,
    Field::Home,
    Field::ProjectName,
    Field::ProjectUser,
];

/// A resolved site: its config, validated profile and a connection to it
pub struct Target {
    pub config: Config,
    pub config_path: Option<PathBuf>,
    pub profile: ValidatedProfile,
    pub connection: Arc<dyn Connection>,
}

/// Load config and validate the profile for `environment`
pub fn load_target(ctx: &Context, environment: Environment, required: &[Field]) -> Result<Target> {
    let (config, config_path) = Config::load(ctx.config.as_deref(), environment)?;
    let profile = validate(&config.profile(environment), required)?;
    let connection = connection::connect(&profile.host, &config.ssh);
    Ok(Target {
        config,
        config_path,
        profile,
        connection,
    })
}

/// Load a site for one of the maintenance commands
pub fn load_site(ctx: &Context, environment: Environment) -> Result<Target> {
    load_target(ctx, environment, &SITE_FIELDS)
}

/// Run one command on the target, failing on a non-zero exit
pub fn run_remote(target: &Target, command: &RemoteCommand) -> Result<CommandOutput> {
    let output = target.connection.run(command)?;
    if !output.success() {
        bail!(
            "`{}` failed on {} (exit {}): {}",
            command.command,
            target.profile.host,
            output.exit_code,
            output.stderr.trim()
        );
    }
    Ok(output)
}
