//! Provisioning steps
//!
//! Every logical action is one parameterized template built on
//! [`ShellStep`]: the commands it runs, the facts its check reads, how it
//! changes observed state and, where one exists, how to undo it. The
//! submodules instantiate the templates for a concrete site.

mod host;
mod links;
mod repo;
mod service;

pub use host::{
    SSH_KEY, chown_home, create_home_dir, create_subdirs, create_user, create_virtualenv,
    generate_ssh_key, remove_home_dir, remove_user,
};
pub use links::{
    link_init_config, link_nginx_config, reload_nginx, unlink_init_config, unlink_nginx_config,
};
pub use repo::{clone_repo, install_crontab, install_dependencies, pull_repo, remove_app_dir};
pub use service::{restart_service, start_service, stop_service};

use declarative::{
    ApplyContext, CheckOutcome, ObservedState, RemoteCommand, ResourceState, Step, StepError,
    StepId,
};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{Config, ServiceManager};
use crate::facts::Fact;
use crate::profile::{ValidatedProfile, join};

// Step ids
pub const CREATE_HOME_DIR: &str = "create-home-dir";
pub const CREATE_USER: &str = "create-user";
pub const CHOWN_HOME: &str = "chown-home";
pub const CREATE_VIRTUALENV: &str = "create-virtualenv";
pub const CREATE_SUBDIRS: &str = "create-subdirs";
pub const GENERATE_SSH_KEY: &str = "generate-ssh-key";
pub const CLONE_REPO: &str = "clone-repo";
pub const PULL_REPO: &str = "pull-repo";
pub const INSTALL_DEPENDENCIES: &str = "install-dependencies";
pub const INSTALL_CRONTAB: &str = "install-crontab";
pub const LINK_NGINX_CONFIG: &str = "link-nginx-config";
pub const UNLINK_NGINX_CONFIG: &str = "unlink-nginx-config";
pub const LINK_INIT_CONFIG: &str = "link-init-config";
pub const UNLINK_INIT_CONFIG: &str = "unlink-init-config";
pub const RELOAD_NGINX: &str = "reload-nginx";
pub const START_SERVICE: &str = "start-service";
pub const STOP_SERVICE: &str = "stop-service";
pub const RESTART_SERVICE: &str = "restart-service";
pub const REMOVE_APP_DIR: &str = "remove-app-dir";
pub const REMOVE_HOME_DIR: &str = "remove-home-dir";
pub const REMOVE_USER: &str = "remove-user";

/// Condition under which a step has nothing to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// The fact is present
    Present(String),
    /// The fact is absent
    Absent(String),
    /// The fact is present with one of these details
    Details { key: String, expected: Vec<String> },
    /// Both facts are present with equal details
    Matches { key: String, other: String },
    /// Every check is satisfied
    All(Vec<Check>),
    /// The step always runs
    Never,
}

impl Check {
    pub fn evaluate(&self, observed: &ObservedState) -> CheckOutcome {
        match self {
            Self::Present(key) => match observed.get(key) {
                Some(ResourceState::Present { .. }) => CheckOutcome::Satisfied,
                Some(ResourceState::Absent) => CheckOutcome::Unsatisfied,
                _ => CheckOutcome::Unknown,
            },
            Self::Absent(key) => match observed.get(key) {
                Some(ResourceState::Absent) => CheckOutcome::Satisfied,
                Some(ResourceState::Present { .. }) => CheckOutcome::Unsatisfied,
                _ => CheckOutcome::Unknown,
            },
            Self::Details { key, expected } => match observed.get(key) {
                Some(state @ ResourceState::Present { .. }) => {
                    match state.details() {
                        Some(d) if expected.iter().any(|e| e == d) => CheckOutcome::Satisfied,
                        _ => CheckOutcome::Unsatisfied,
                    }
                }
                Some(ResourceState::Absent) => CheckOutcome::Unsatisfied,
                _ => CheckOutcome::Unknown,
            },
            Self::Matches { key, other } => match (observed.get(key), observed.get(other)) {
                (Some(ResourceState::Absent), _) | (_, Some(ResourceState::Absent)) => {
                    CheckOutcome::Unsatisfied
                }
                (Some(a), Some(b)) => match (a.details(), b.details()) {
                    (Some(a), Some(b)) if a == b => CheckOutcome::Satisfied,
                    (Some(_), Some(_)) => CheckOutcome::Unsatisfied,
                    _ => CheckOutcome::Unknown,
                },
                _ => CheckOutcome::Unknown,
            },
            Self::All(checks) => {
                let mut outcome = CheckOutcome::Satisfied;
                for check in checks {
                    match check.evaluate(observed) {
                        CheckOutcome::Unsatisfied => return CheckOutcome::Unsatisfied,
                        CheckOutcome::Unknown => outcome = CheckOutcome::Unknown,
                        CheckOutcome::Satisfied => {}
                    }
                }
                outcome
            }
            Self::Never => CheckOutcome::Unsatisfied,
        }
    }
}

/// How a successful apply changes observed state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Set(String, ResourceState),
    Forget(String),
    /// `to` takes on the current state of `from`
    Copy { from: String, to: String },
    /// Every known fact about this path or anything under it is now absent
    AbsentUnder(String),
}

impl Effect {
    pub fn present(fact: &Fact) -> Self {
        Self::Set(fact.key(), ResourceState::present())
    }

    pub fn absent(fact: &Fact) -> Self {
        Self::Set(fact.key(), ResourceState::Absent)
    }

    fn apply(&self, observed: &mut ObservedState) {
        match self {
            Self::Set(key, state) => observed.set(key.clone(), state.clone()),
            Self::Forget(key) => observed.forget(key),
            Self::Copy { from, to } => {
                let state = observed.get(from).cloned().unwrap_or(ResourceState::Unknown);
                observed.set(to.clone(), state);
            }
            Self::AbsentUnder(path) => {
                let nested = format!("{}/", path.trim_end_matches('/'));
                observed.mark_absent_where(|key| {
                    key.split_once(':')
                        .is_some_and(|(_, subject)| {
                            subject == path.as_str() || subject.starts_with(&nested)
                        })
                });
            }
        }
    }
}

/// Line a guarded command prints when it created its resource
pub const CREATED_MARKER: &str = "@foreman:created";

/// A step that runs shell commands on the target
#[derive(Debug, Clone)]
pub struct ShellStep {
    id: &'static str,
    description: String,
    commands: Vec<RemoteCommand>,
    undo: Vec<RemoteCommand>,
    /// Undo only what apply reported creating via [`CREATED_MARKER`]
    guarded: bool,
    created: Arc<AtomicBool>,
    check: Check,
    effects: Vec<Effect>,
    reads: Vec<Fact>,
}

impl ShellStep {
    pub fn new(id: &'static str, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            commands: Vec::new(),
            undo: Vec::new(),
            guarded: false,
            created: Arc::new(AtomicBool::new(false)),
            check: Check::Never,
            effects: Vec::new(),
            reads: Vec::new(),
        }
    }

    pub fn run(mut self, command: RemoteCommand) -> Self {
        self.commands.push(command);
        self
    }

    /// Add a compensating command, run in order on rollback
    pub fn undo_with(mut self, command: RemoteCommand) -> Self {
        self.undo.push(command);
        self
    }

    /// Like [`Self::undo_with`], but the undo only runs if apply printed
    /// [`CREATED_MARKER`]; a resource that was already there is left alone
    pub fn undo_if_created(mut self, command: RemoteCommand) -> Self {
        self.guarded = true;
        self.undo_with(command)
    }

    pub fn satisfied_when(mut self, check: Check) -> Self {
        self.check = check;
        self
    }

    pub fn effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Declare a fact the check reads, so it gets queried before planning
    pub fn reads(mut self, fact: Fact) -> Self {
        self.reads.push(fact);
        self
    }

    pub fn static_id(&self) -> &'static str {
        self.id
    }

    pub fn facts(&self) -> &[Fact] {
        &self.reads
    }

    pub fn commands(&self) -> &[RemoteCommand] {
        &self.commands
    }

    fn run_all(ctx: &ApplyContext<'_>, commands: &[RemoteCommand]) -> Result<String, StepError> {
        let mut output = Vec::new();
        for command in commands {
            let out = ctx.run(command)?;
            let text = out.combined();
            if !text.is_empty() {
                output.push(text);
            }
        }
        Ok(output.join("\n"))
    }
}

impl Step for ShellStep {
    fn id(&self) -> StepId {
        self.id.to_string()
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn check(&self, observed: &ObservedState) -> CheckOutcome {
        self.check.evaluate(observed)
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<String, StepError> {
        let output = Self::run_all(ctx, &self.commands)?;
        if !self.guarded {
            return Ok(output);
        }

        let created = output.lines().any(|l| l.trim() == CREATED_MARKER);
        self.created.store(created, Ordering::SeqCst);
        Ok(output
            .lines()
            .filter(|l| l.trim() != CREATED_MARKER)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn effects(&self, observed: &mut ObservedState) {
        for effect in &self.effects {
            effect.apply(observed);
        }
    }

    fn can_rollback(&self) -> bool {
        !self.undo.is_empty()
    }

    fn rollback(&self, ctx: &ApplyContext<'_>) -> Result<String, StepError> {
        if self.guarded && !self.created.load(Ordering::SeqCst) {
            log::debug!("{} created nothing, leaving it in place", self.id);
            return Ok(format!("{} existed before this run, left in place", self.id));
        }
        Self::run_all(ctx, &self.undo)
    }
}

/// Everything a template needs to know about the target
#[derive(Debug, Clone, Copy)]
pub struct Site<'a> {
    pub profile: &'a ValidatedProfile,
    pub config: &'a Config,
}

impl<'a> Site<'a> {
    pub fn new(profile: &'a ValidatedProfile, config: &'a Config) -> Self {
        Self { profile, config }
    }

    pub fn user(&self) -> &str {
        &self.profile.project_user
    }

    fn manager(&self) -> ServiceManager {
        self.config.service.manager
    }

    /// Enabled nginx site for the project's virtual host
    pub fn nginx_site(&self) -> String {
        join(&self.config.service.nginx_sites_dir, &self.profile.project_url)
    }

    /// Installed init config for the project's service
    pub fn init_config(&self) -> String {
        let file = match self.manager() {
            ServiceManager::Upstart => format!("{}.conf", self.profile.project_name),
            ServiceManager::Systemd => format!("{}.service", self.profile.project_name),
        };
        join(self.config.service.init_dir(), &file)
    }

    /// Absolute paths of checkout-relative candidates
    fn in_checkout(&self, candidates: Vec<String>) -> Vec<String> {
        candidates
            .iter()
            .map(|c| self.profile.project_path(c))
            .collect()
    }

    pub fn nginx_sources(&self) -> Vec<String> {
        self.in_checkout(self.config.files.nginx_candidates(self.profile.environment))
    }

    pub fn init_sources(&self) -> Vec<String> {
        self.in_checkout(
            self.config
                .files
                .init_candidates(self.manager(), self.profile.environment),
        )
    }

    pub fn requirements_sources(&self) -> Vec<String> {
        self.in_checkout(
            self.config
                .files
                .requirements_candidates(self.profile.environment),
        )
    }

    pub fn crontab_sources(&self) -> Vec<String> {
        self.in_checkout(self.config.files.crontab_candidates(self.profile.environment))
    }

    fn service_fact(&self) -> Fact {
        Fact::Service {
            name: self.profile.project_name.clone(),
            manager: self.manager(),
        }
    }

    fn nginx_reload_fact(&self) -> Fact {
        Fact::PendingReload(self.config.service.nginx_service.clone())
    }

    /// Command controlling a service (`start`, `stop`, `restart`, `reload`)
    fn service_command(&self, action: &str, name: &str) -> RemoteCommand {
        let line = match self.manager() {
            ServiceManager::Upstart => format!("{action} {}", crate::connection::quote(name)),
            ServiceManager::Systemd => {
                format!("systemctl {action} {}", crate::connection::quote(name))
            }
        };
        RemoteCommand::new(line).sudo()
    }

    /// Command run after init configs change, if the manager needs one
    fn init_changed(&self) -> Option<RemoteCommand> {
        match self.manager() {
            ServiceManager::Upstart => None,
            ServiceManager::Systemd => Some(RemoteCommand::new("systemctl daemon-reload").sudo()),
        }
    }
}

/// Shell snippet running `action "$f"` on the first existing candidate, or
/// failing with a message naming every candidate tried
fn first_existing(candidates: &[String], action: &str) -> String {
    let list = candidates
        .iter()
        .map(|c| crate::connection::quote(c))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "for f in {list}; do if [ -f \"$f\" ]; then {action}; exit $?; fi; done; \
         echo {} >&2; exit 1",
        crate::connection::quote(&format!("none of {} exists", candidates.join(", ")))
    )
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_present_and_absent() {
        let mut observed = ObservedState::new();
        let present = Check::Present("dir:/srv".into());
        let absent = Check::Absent("dir:/srv".into());
        assert_eq!(present.evaluate(&observed), CheckOutcome::Unknown);

        observed.set("dir:/srv", ResourceState::present());
        assert_eq!(present.evaluate(&observed), CheckOutcome::Satisfied);
        assert_eq!(absent.evaluate(&observed), CheckOutcome::Unsatisfied);
    }

    #[test]
    fn test_check_details() {
        let check = Check::Details {
            key: "owner:/srv".into(),
            expected: vec!["site:www".into()],
        };
        let mut observed = ObservedState::new();
        observed.set("owner:/srv", ResourceState::present_with("root:root"));
        assert_eq!(check.evaluate(&observed), CheckOutcome::Unsatisfied);
        observed.set("owner:/srv", ResourceState::present_with("site:www"));
        assert_eq!(check.evaluate(&observed), CheckOutcome::Satisfied);
    }

    #[test]
    fn test_check_matches() {
        let check = Check::Matches {
            key: "revision:/srv/site".into(),
            other: "remote-revision:/srv/site".into(),
        };
        let mut observed = ObservedState::new();
        observed.set("revision:/srv/site", ResourceState::present_with("abc"));
        assert_eq!(check.evaluate(&observed), CheckOutcome::Unknown);

        observed.set("remote-revision:/srv/site", ResourceState::present_with("def"));
        assert_eq!(check.evaluate(&observed), CheckOutcome::Unsatisfied);

        observed.set("remote-revision:/srv/site", ResourceState::present_with("abc"));
        assert_eq!(check.evaluate(&observed), CheckOutcome::Satisfied);
    }

    #[test]
    fn test_check_all() {
        let check = Check::All(vec![
            Check::Present("dir:/a".into()),
            Check::Present("dir:/b".into()),
        ]);
        let mut observed = ObservedState::new();
        observed.set("dir:/a", ResourceState::present());
        assert_eq!(check.evaluate(&observed), CheckOutcome::Unknown);
        observed.set("dir:/b", ResourceState::Absent);
        assert_eq!(check.evaluate(&observed), CheckOutcome::Unsatisfied);
    }

    #[test]
    fn test_absent_under_marks_nested_facts() {
        let mut observed = ObservedState::new();
        observed.set("dir:/srv/app", ResourceState::present());
        observed.set("checkout:/srv/app/site", ResourceState::present_with("url"));
        observed.set("dir:/srv/application", ResourceState::present());
        observed.set("user:site", ResourceState::present());

        Effect::AbsentUnder("/srv/app".into()).apply(&mut observed);
        assert!(observed.get("dir:/srv/app").unwrap().is_absent());
        assert!(observed.get("checkout:/srv/app/site").unwrap().is_absent());
        assert!(observed.get("dir:/srv/application").unwrap().is_present());
        assert!(observed.get("user:site").unwrap().is_present());
    }

    #[test]
    fn test_first_existing_snippet() {
        let snippet = first_existing(
            &["/srv/app/site/etc/nginx.conf".into(), "/srv/app/site/etc/nginx.staging.conf".into()],
            "ln -s \"$f\" /etc/nginx/sites-enabled/site",
        );
        assert!(snippet.starts_with(
            "for f in /srv/app/site/etc/nginx.conf /srv/app/site/etc/nginx.staging.conf; do"
        ));
        assert!(snippet.contains("exit 1"));
    }

    #[test]
    fn test_site_paths() {
        let profile = testing::validated();
        let config = Config::default();
        let site = Site::new(&profile, &config);
        assert_eq!(site.nginx_site(), "/etc/nginx/sites-enabled/site.example.com");
        assert_eq!(site.init_config(), "/etc/init/site.conf");
        assert_eq!(
            site.nginx_sources(),
            vec![
                "/srv/app/site/etc/nginx.conf".to_string(),
                "/srv/app/site/etc/nginx.staging.conf".to_string()
            ]
        );
    }
}
