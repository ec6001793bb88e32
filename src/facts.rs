//! Facts about a target and how to query them
//!
//! Each fact has a stable key (`kind:subject`) in [`ObservedState`]. Most
//! can be queried with a read-only command; the rest (installed
//! dependencies, a pending nginx reload) are only known from the journal.

use declarative::{CommandOutput, Connection, ObservedState, RemoteCommand, ResourceState};
use rayon::prelude::*;

use crate::config::ServiceManager;
use crate::connection::quote;
use crate::profile::Vcs;

/// Something about the target a step's check reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fact {
    /// A directory exists
    Dir(String),
    /// A regular file exists
    File(String),
    /// A system user exists; details carry the uid
    User(String),
    /// Owner of a path as `user:group`
    Owner(String),
    /// A symlink exists; details carry its target
    Link(String),
    /// A virtualenv with a python interpreter exists at this root
    Venv(String),
    /// `dest` is identical to the first existing of `sources`
    Installed { dest: String, sources: Vec<String> },
    /// `dir` is a checkout; details carry its origin url
    Checkout { dir: String, vcs: Vcs, user: String },
    /// Revision checked out in `dir`
    Revision { dir: String, vcs: Vcs, user: String },
    /// Newest revision of the checkout's upstream branch
    RemoteRevision {
        dir: String,
        vcs: Vcs,
        user: String,
        branch: String,
    },
    /// The service is running
    Service { name: String, manager: ServiceManager },
    /// The user's crontab matches the first existing of `sources`
    Crontab { user: String, sources: Vec<String> },
    /// Requirements were installed from the checkout in `dir`
    Deps(String),
    /// A reload of this service is owed after a config change
    PendingReload(String),
}

impl Fact {
    /// Key of this fact in [`ObservedState`]
    pub fn key(&self) -> String {
        match self {
            Self::Dir(path) => format!("dir:{path}"),
            Self::File(path) => format!("file:{path}"),
            Self::User(name) => format!("user:{name}"),
            Self::Owner(path) => format!("owner:{path}"),
            Self::Link(path) => format!("link:{path}"),
            Self::Venv(path) => format!("venv:{path}"),
            Self::Installed { dest, .. } => format!("installed:{dest}"),
            Self::Checkout { dir, .. } => format!("checkout:{dir}"),
            Self::Revision { dir, .. } => format!("revision:{dir}"),
            Self::RemoteRevision { dir, .. } => format!("remote-revision:{dir}"),
            Self::Service { name, .. } => format!("service:{name}"),
            Self::Crontab { user, .. } => format!("crontab:{user}"),
            Self::Deps(dir) => format!("deps:{dir}"),
            Self::PendingReload(name) => format!("pending-reload:{name}"),
        }
    }

    /// Read-only command that observes this fact, if it can be queried
    ///
    /// Exit 0 means present, 1 absent; anything else leaves the fact
    /// unknown.
    pub fn query(&self) -> Option<RemoteCommand> {
        let command = match self {
            Self::Dir(path) => RemoteCommand::new(format!("test -d {}", quote(path))).sudo(),
            Self::File(path) => RemoteCommand::new(format!("test -f {}", quote(path))).sudo(),
            Self::User(name) => RemoteCommand::new(format!("id -u {}", quote(name))),
            Self::Owner(path) => {
                let path = quote(path);
                RemoteCommand::new(format!(
                    "test -e {path} || exit 1; stat -c %U:%G {path}"
                ))
                .sudo()
            }
            Self::Link(path) => RemoteCommand::new(format!("readlink {}", quote(path))).sudo(),
            Self::Venv(root) => {
                RemoteCommand::new(format!("test -x {}/bin/python", quote(root))).sudo()
            }
            Self::Installed { dest, sources } => RemoteCommand::new(format!(
                "for f in {}; do if [ -f \"$f\" ]; then cmp -s \"$f\" {} && exit 0; exit 1; fi; done; exit 2",
                join_quoted(sources),
                quote(dest)
            ))
            .sudo(),
            Self::Checkout { dir, vcs, user } => {
                let query = match vcs {
                    Vcs::Git => format!(
                        "test -d {d}/.git || exit 1; git -C {d} config --get remote.origin.url",
                        d = quote(dir)
                    ),
                    Vcs::Mercurial => format!(
                        "test -d {d}/.hg || exit 1; hg --cwd {d} paths default",
                        d = quote(dir)
                    ),
                };
                RemoteCommand::new(query).as_user(user)
            }
            Self::Revision { dir, vcs, user } => {
                let query = match vcs {
                    Vcs::Git => format!(
                        "test -d {d}/.git || exit 1; git -C {d} rev-parse HEAD",
                        d = quote(dir)
                    ),
                    Vcs::Mercurial => format!(
                        "test -d {d}/.hg || exit 1; hg --cwd {d} id -i -r .",
                        d = quote(dir)
                    ),
                };
                RemoteCommand::new(query).as_user(user)
            }
            Self::RemoteRevision {
                dir,
                vcs,
                user,
                branch,
            } => {
                let query = match vcs {
                    Vcs::Git => format!(
                        "test -d {d}/.git || exit 1; git -C {d} ls-remote origin {r} | cut -f1 | grep .",
                        d = quote(dir),
                        r = quote(&format!("refs/heads/{branch}"))
                    ),
                    Vcs::Mercurial => format!(
                        "test -d {d}/.hg || exit 1; hg --cwd {d} id -i default",
                        d = quote(dir)
                    ),
                };
                RemoteCommand::new(query).as_user(user)
            }
            Self::Service { name, manager } => match manager {
                ServiceManager::Upstart => RemoteCommand::new(format!("status {}", quote(name))),
                ServiceManager::Systemd => {
                    RemoteCommand::new(format!("systemctl is-active {}", quote(name)))
                }
            },
            Self::Crontab { user, sources } => RemoteCommand::new(format!(
                "for f in {}; do if [ -f \"$f\" ]; then crontab -l -u {} 2>/dev/null | cmp -s - \"$f\" && exit 0; exit 1; fi; done; exit 2",
                join_quoted(sources),
                quote(user)
            ))
            .sudo(),
            Self::Deps(_) | Self::PendingReload(_) => return None,
        };
        Some(command.quiet())
    }

    /// Interpret the output of [`Fact::query`]
    pub fn interpret(&self, output: &CommandOutput) -> ResourceState {
        if let Self::Service { manager, .. } = self {
            return match manager {
                ServiceManager::Upstart if output.stdout.contains("start/running") => {
                    ResourceState::present()
                }
                ServiceManager::Upstart => ResourceState::Absent,
                ServiceManager::Systemd if output.success() => ResourceState::present(),
                ServiceManager::Systemd => ResourceState::Absent,
            };
        }

        match output.exit_code {
            0 => {
                let details = output.stdout.trim();
                if details.is_empty() {
                    ResourceState::present()
                } else {
                    ResourceState::present_with(details)
                }
            }
            1 => ResourceState::Absent,
            _ => ResourceState::Unknown,
        }
    }
}

fn join_quoted(items: &[String]) -> String {
    items.iter().map(|i| quote(i)).collect::<Vec<_>>().join(" ")
}

/// Query every fact through `connection`, in parallel
///
/// Returns each queryable fact with its observed state; a fact whose query
/// could not run is `Unknown`.
pub fn query_all(facts: &[Fact], connection: &dyn Connection) -> Vec<(String, ResourceState)> {
    facts
        .par_iter()
        .filter_map(|fact| {
            let command = fact.query()?;
            let state = match connection.run(&command) {
                Ok(output) => fact.interpret(&output),
                Err(e) => {
                    log::warn!("Could not query {}: {}", fact.key(), e);
                    ResourceState::Unknown
                }
            };
            log::debug!("Observed {} = {}", fact.key(), state);
            Some((fact.key(), state))
        })
        .collect()
}

/// Observed state: `remembered` facts overlaid with fresh queries
///
/// A query that comes back unknown drops the remembered value for that
/// fact rather than trusting it.
pub fn observe(
    facts: &[Fact],
    connection: &dyn Connection,
    remembered: &ObservedState,
) -> ObservedState {
    let mut observed = remembered.clone();
    for (key, state) in query_all(facts, connection) {
        observed.set(key, state);
    }
    observed
}
