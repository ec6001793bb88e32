//! foreman.toml - layered profile configuration and run settings
//!
//! ```toml
//! [defaults]
//! project_name = "site"
//! project_user = "site"
//! project_group = "site"
//! project_repo = "git://git@github.com:acme/site.git"
//!
//! [environments.staging]
//! host = "deploy@staging.example.com"
//! home = "/srv/site"
//! project_url = "staging.example.com"
//!
//! [run]
//! jobs = 3
//! policy = "rollback-on-failure"
//! step_timeout_secs = 600
//! ```

use anyhow::{Context, Result};
use declarative::FailurePolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;
use crate::profile::{Environment, EnvironmentProfile};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG: &str = "FOREMAN_CONFIG";

/// Profile fields settable from the environment, applied over the file
const PROFILE_ENV_VARS: [&str; 8] = [
    "FOREMAN_HOST",
    "FOREMAN_HOME",
    "FOREMAN_PROJECT_NAME",
    "FOREMAN_PROJECT_USER",
    "FOREMAN_PROJECT_GROUP",
    "FOREMAN_PROJECT_REPO",
    "FOREMAN_PROJECT_URL",
    "FOREMAN_VENV_PATH",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Profile values shared by every environment
    pub defaults: ProfileLayer,
    /// Per-environment overrides, keyed by environment name
    pub environments: HashMap<String, ProfileLayer>,
    pub run: RunConfig,
    pub files: FilesConfig,
    pub service: ServiceConfig,
    pub repo: RepoConfig,
    pub ssh: SshConfig,
}

/// One layer of profile values; later layers win field by field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileLayer {
    pub host: Option<String>,
    pub home: Option<String>,
    pub project_name: Option<String>,
    pub project_user: Option<String>,
    pub project_group: Option<String>,
    pub project_repo: Option<String>,
    pub project_url: Option<String>,
    pub venv_path: Option<String>,
}

impl ProfileLayer {
    fn apply_to(&self, profile: &mut EnvironmentProfile) {
        let fields = [
            (&self.host, &mut profile.host),
            (&self.home, &mut profile.home),
            (&self.project_name, &mut profile.project_name),
            (&self.project_user, &mut profile.project_user),
            (&self.project_group, &mut profile.project_group),
            (&self.project_repo, &mut profile.project_repo),
            (&self.project_url, &mut profile.project_url),
            (&self.venv_path, &mut profile.venv_path),
        ];
        for (value, slot) in fields {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
    }

    /// Layer built from `FOREMAN_*` variables as seen through `lookup`
    fn from_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let [host, home, name, user, group, repo, url, venv] =
            PROFILE_ENV_VARS.map(|var| lookup(var).filter(|v| !v.trim().is_empty()));
        Self {
            host,
            home,
            project_name: name,
            project_user: user,
            project_group: group,
            project_repo: repo,
            project_url: url,
            venv_path: venv,
        }
    }
}

/// Executor settings; CLI flags override these
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub jobs: usize,
    pub policy: FailurePolicy,
    pub step_timeout_secs: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            policy: FailurePolicy::FailFast,
            step_timeout_secs: None,
        }
    }
}

impl RunConfig {
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }
}

/// Candidate config files inside the checkout, tried in order
///
/// `{environment}` is replaced by the profile's environment name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub nginx: Vec<String>,
    /// Defaults to the service manager's own candidates when unset
    pub init: Option<Vec<String>>,
    pub requirements: Vec<String>,
    pub crontab: Vec<String>,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            nginx: vec!["etc/nginx.conf".into(), "etc/nginx.{environment}.conf".into()],
            init: None,
            requirements: vec!["etc/pip.conf".into()],
            crontab: vec!["etc/cron.txt".into()],
        }
    }
}

impl FilesConfig {
    pub fn nginx_candidates(&self, environment: Environment) -> Vec<String> {
        expand_candidates(&self.nginx, environment)
    }

    pub fn init_candidates(&self, manager: ServiceManager, environment: Environment) -> Vec<String> {
        match &self.init {
            Some(init) => expand_candidates(init, environment),
            None => expand_candidates(&manager.default_init_candidates(), environment),
        }
    }

    pub fn requirements_candidates(&self, environment: Environment) -> Vec<String> {
        expand_candidates(&self.requirements, environment)
    }

    pub fn crontab_candidates(&self, environment: Environment) -> Vec<String> {
        expand_candidates(&self.crontab, environment)
    }
}

fn expand_candidates(candidates: &[String], environment: Environment) -> Vec<String> {
    candidates
        .iter()
        .map(|c| c.replace("{environment}", environment.as_str()))
        .collect()
}

/// Init system that supervises the application process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceManager {
    #[default]
    Upstart,
    Systemd,
}

impl ServiceManager {
    fn default_init_candidates(self) -> Vec<String> {
        match self {
            Self::Upstart => vec!["etc/upstart.conf".into(), "etc/upstart.{environment}.conf".into()],
            Self::Systemd => vec![
                "etc/systemd.service".into(),
                "etc/systemd.{environment}.service".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub manager: ServiceManager,
    pub nginx_sites_dir: String,
    /// Directory init configs are installed into; manager default when unset
    pub init_dir: Option<String>,
    pub nginx_service: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            manager: ServiceManager::Upstart,
            nginx_sites_dir: "/etc/nginx/sites-enabled".into(),
            init_dir: None,
            nginx_service: "nginx".into(),
        }
    }
}

impl ServiceConfig {
    pub fn init_dir(&self) -> &str {
        match (&self.init_dir, self.manager) {
            (Some(dir), _) => dir,
            (None, ServiceManager::Upstart) => "/etc/init",
            (None, ServiceManager::Systemd) => "/etc/systemd/system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Protocol substituted for `hg://` when cloning
    pub pull_protocol: String,
    /// Branch pulled on deploy (git)
    pub branch: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            pull_protocol: "ssh".into(),
            branch: "master".into(),
        }
    }
}

/// Options passed to `ssh` for remote hosts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub port: Option<u16>,
    pub identity_file: Option<String>,
    pub options: Vec<String>,
}

impl Config {
    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// Locate and load the config for `environment`
    ///
    /// Search order: `explicit`, then `FOREMAN_CONFIG`, then the first
    /// existing of `./foreman.toml`, `./foreman.<environment>.toml` and
    /// `<config dir>/foreman.toml`. No file at all yields the defaults, so a
    /// profile can come entirely from the environment.
    pub fn load(explicit: Option<&Path>, environment: Environment) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        if let Ok(path) = std::env::var(ENV_CONFIG) {
            let path = paths::expand(&path);
            log::debug!("Using config from {}: {}", ENV_CONFIG, path.display());
            return Ok((Self::from_file(&path)?, Some(path)));
        }

        for path in Self::candidates(environment)? {
            if path.is_file() {
                log::debug!("Using config file {}", path.display());
                return Ok((Self::from_file(&path)?, Some(path)));
            }
        }

        log::debug!("No config file found, using defaults");
        Ok((Self::default(), None))
    }

    fn candidates(environment: Environment) -> Result<Vec<PathBuf>> {
        Ok(vec![
            PathBuf::from("foreman.toml"),
            PathBuf::from(format!("foreman.{environment}.toml")),
            paths::config_dir()?.join("foreman.toml"),
        ])
    }

    /// Resolve the profile for `environment` from the process environment
    pub fn profile(&self, environment: Environment) -> EnvironmentProfile {
        self.profile_with(environment, |var| std::env::var(var).ok())
    }

    /// Resolve the profile: defaults, then the environment's table, then
    /// `FOREMAN_*` variables as seen through `lookup`
    pub fn profile_with<F>(&self, environment: Environment, lookup: F) -> EnvironmentProfile
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut profile = EnvironmentProfile::new(environment);
        self.defaults.apply_to(&mut profile);
        if let Some(layer) = self.environments.get(environment.as_str()) {
            layer.apply_to(&mut profile);
        }
        ProfileLayer::from_env(lookup).apply_to(&mut profile);
        profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[defaults]
project_name = "site"
project_user = "site"
home = "/srv/default"

[environments.staging]
host = "staging.example.com"
home = "/srv/site"

[run]
jobs = 3
policy = "rollback-on-failure"
step_timeout_secs = 120

[files]
nginx = ["deploy/{environment}/nginx.conf"]

[service]
manager = "systemd"
"#;

    fn sample() -> Config {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_defaults_when_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.run.jobs, 1);
        assert_eq!(config.run.policy, FailurePolicy::FailFast);
        assert_eq!(config.run.step_timeout(), None);
        assert_eq!(config.repo.pull_protocol, "ssh");
        assert_eq!(config.service.init_dir(), "/etc/init");
    }

    #[test]
    fn test_environment_layer_overrides_defaults() {
        let profile = sample().profile_with(Environment::Staging, |_| None);
        assert_eq!(profile.host.as_deref(), Some("staging.example.com"));
        assert_eq!(profile.home.as_deref(), Some("/srv/site"));
        assert_eq!(profile.project_name.as_deref(), Some("site"));

        let production = sample().profile_with(Environment::Production, |_| None);
        assert_eq!(production.host, None);
        assert_eq!(production.home.as_deref(), Some("/srv/default"));
    }

    #[test]
    fn test_env_vars_override_file() {
        let profile = sample().profile_with(Environment::Staging, |var| match var {
            "FOREMAN_HOST" => Some("override.example.com".into()),
            "FOREMAN_PROJECT_URL" => Some("site.example.com".into()),
            "FOREMAN_HOME" => Some("  ".into()),
            _ => None,
        });
        assert_eq!(profile.host.as_deref(), Some("override.example.com"));
        assert_eq!(profile.project_url.as_deref(), Some("site.example.com"));
        assert_eq!(profile.home.as_deref(), Some("/srv/site"));
    }

    #[test]
    fn test_run_and_service_sections() {
        let config = sample();
        assert_eq!(config.run.jobs, 3);
        assert_eq!(config.run.policy, FailurePolicy::RollbackOnFailure);
        assert_eq!(config.run.step_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.service.manager, ServiceManager::Systemd);
        assert_eq!(config.service.init_dir(), "/etc/systemd/system");
    }

    #[test]
    fn test_candidate_expansion() {
        let config = sample();
        assert_eq!(
            config.files.nginx_candidates(Environment::Production),
            vec!["deploy/production/nginx.conf".to_string()]
        );
        assert_eq!(
            config
                .files
                .init_candidates(ServiceManager::Upstart, Environment::Staging),
            vec!["etc/upstart.conf".to_string(), "etc/upstart.staging.conf".to_string()]
        );
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foreman.toml");
        fs::write(&path, SAMPLE).unwrap();

        let (config, found) = Config::load(Some(&path), Environment::Staging).unwrap();
        assert_eq!(found, Some(path));
        assert_eq!(config.run.jobs, 3);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foreman.toml");
        fs::write(&path, "[run]\njobs = \"many\"").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("foreman.toml"));
    }
}
