//! Environment profiles and their validation
//!
//! An [`EnvironmentProfile`] is the raw, possibly incomplete configuration
//! for one (host, project, environment) triple. [`validate`] checks it
//! against the fields an operation requires and produces a
//! [`ValidatedProfile`] that planning can rely on.

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!(
                "unknown environment '{other}' (expected development, staging or production)"
            )),
        }
    }
}

/// A profile field an operation can require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Host,
    Home,
    ProjectName,
    ProjectUser,
    ProjectGroup,
    ProjectRepo,
    ProjectUrl,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Home => "home",
            Self::ProjectName => "project_name",
            Self::ProjectUser => "project_user",
            Self::ProjectGroup => "project_group",
            Self::ProjectRepo => "project_repo",
            Self::ProjectUrl => "project_url",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a profile cannot be planned against
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(Field),

    #[error("unknown repository protocol in '{0}' (expected hg://, ssh:// or git://)")]
    UnknownRepositoryProtocol(String),

    #[error("home must be an absolute path, got '{0}'")]
    RelativeHome(String),

    #[error("home must name a directory below the filesystem root, got '{0}'")]
    RootHome(String),

    #[error("invalid {field}: '{value}'")]
    InvalidName { field: Field, value: String },
}

/// Version control system behind a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vcs {
    Mercurial,
    Git,
}

/// Scheme tag of a project repository, resolved once at validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoProtocol {
    /// `hg://` - Mercurial, pulled over the configured protocol
    Hg,
    /// `ssh://` - Mercurial over ssh
    Ssh,
    /// `git://` - git; the remainder is handed to `git clone`
    Git,
}

impl RepoProtocol {
    pub fn vcs(self) -> Vcs {
        match self {
            Self::Hg | Self::Ssh => Vcs::Mercurial,
            Self::Git => Vcs::Git,
        }
    }
}

/// A project repository with its protocol resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub protocol: RepoProtocol,
    pub url: String,
}

impl Repository {
    pub fn parse(url: &str) -> Result<Self, ValidationError> {
        let protocol = if url.starts_with("hg://") {
            RepoProtocol::Hg
        } else if url.starts_with("ssh://") {
            RepoProtocol::Ssh
        } else if url.starts_with("git://") {
            RepoProtocol::Git
        } else {
            return Err(ValidationError::UnknownRepositoryProtocol(url.to_string()));
        };

        Ok(Self {
            protocol,
            url: url.to_string(),
        })
    }

    pub fn vcs(&self) -> Vcs {
        self.protocol.vcs()
    }

    /// The location handed to the clone command
    ///
    /// `hg://` is rewritten to `pull_protocol://`; `git://` is only a tag
    /// and is stripped (so `git://git@host:org/site.git` clones
    /// `git@host:org/site.git`).
    pub fn clone_url(&self, pull_protocol: &str) -> String {
        match self.protocol {
            RepoProtocol::Hg => self.url.replacen("hg://", &format!("{pull_protocol}://"), 1),
            RepoProtocol::Ssh => self.url.clone(),
            RepoProtocol::Git => self.url.trim_start_matches("git://").to_string(),
        }
    }
}

/// Raw configuration for one target, before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentProfile {
    pub host: Option<String>,
    pub home: Option<String>,
    pub project_name: Option<String>,
    pub project_user: Option<String>,
    pub project_group: Option<String>,
    pub project_repo: Option<String>,
    pub project_url: Option<String>,
    pub environment: Environment,
    pub venv_path: Option<String>,
}

impl EnvironmentProfile {
    /// An empty profile for `environment`
    pub fn new(environment: Environment) -> Self {
        Self {
            host: None,
            home: None,
            project_name: None,
            project_user: None,
            project_group: None,
            project_repo: None,
            project_url: None,
            environment,
            venv_path: None,
        }
    }

    /// Value of `field`, if present and not blank
    pub fn get(&self, field: Field) -> Option<&str> {
        let value = match field {
            Field::Host => &self.host,
            Field::Home => &self.home,
            Field::ProjectName => &self.project_name,
            Field::ProjectUser => &self.project_user,
            Field::ProjectGroup => &self.project_group,
            Field::ProjectRepo => &self.project_repo,
            Field::ProjectUrl => &self.project_url,
        };
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}

/// A profile checked against an operation's required fields
///
/// Fields the operation did not require are empty strings when absent;
/// templates only read the fields their operation requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedProfile {
    pub host: String,
    pub home: String,
    pub project_name: String,
    pub project_user: String,
    pub project_group: String,
    pub project_url: String,
    pub environment: Environment,
    pub repository: Option<Repository>,
    venv_path: Option<String>,
}

impl ValidatedProfile {
    /// Checkout directory of the project
    pub fn project_dir(&self) -> String {
        join(&self.home, &self.project_name)
    }

    /// Root of the virtualenv; the home directory unless configured
    pub fn venv(&self) -> &str {
        self.venv_path.as_deref().unwrap_or(&self.home)
    }

    pub fn venv_bin(&self, program: &str) -> String {
        join(&join(self.venv(), "bin"), program)
    }

    /// Path inside the home directory
    pub fn home_path(&self, relative: &str) -> String {
        join(&self.home, relative)
    }

    /// Path inside the checkout
    pub fn project_path(&self, relative: &str) -> String {
        join(&self.project_dir(), relative)
    }
}

/// Join remote path segments; remote paths are always POSIX
pub fn join(base: &str, relative: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), relative.trim_start_matches('/'))
}

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_.-]*$").unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Validate `profile` against `required`
///
/// Fields are checked in the order given; the first missing or malformed
/// one is reported. Fields that are not required are not checked.
/// Has a real path segment and never climbs with `..`
fn below_root(path: &str) -> bool {
    let components: Vec<Component<'_>> = Path::new(path).components().collect();
    components.iter().any(|c| matches!(c, Component::Normal(_)))
        && !components.iter().any(|c| matches!(c, Component::ParentDir))
}

pub fn validate(
    profile: &EnvironmentProfile,
    required: &[Field],
) -> Result<ValidatedProfile, ValidationError> {
    let mut repository = None;

    for &field in required {
        let value = profile
            .get(field)
            .ok_or(ValidationError::MissingField(field))?;

        match field {
            Field::Home if !Path::new(value).is_absolute() => {
                return Err(ValidationError::RelativeHome(value.to_string()));
            }
            // destroy runs `rm -rf` on home
            Field::Home if !below_root(value) => {
                return Err(ValidationError::RootHome(value.to_string()));
            }
            Field::ProjectName | Field::ProjectUser | Field::ProjectGroup
                if !NAME_RE.is_match(value) =>
            {
                return Err(ValidationError::InvalidName {
                    field,
                    value: value.to_string(),
                });
            }
            Field::ProjectRepo => repository = Some(Repository::parse(value)?),
            _ => {}
        }
    }

    let owned = |field| profile.get(field).unwrap_or_default().to_string();
    Ok(ValidatedProfile {
        host: owned(Field::Host),
        home: owned(Field::Home),
        project_name: owned(Field::ProjectName),
        project_user: owned(Field::ProjectUser),
        project_group: owned(Field::ProjectGroup),
        project_url: owned(Field::ProjectUrl),
        environment: profile.environment,
        repository,
        venv_path: profile
            .venv_path
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
    })
}
