//! Plan Graph Builder
//!
//! Maps an operation onto its fixed template of steps. Edges encode real
//! ordering needs: the service stops before its files go away, the
//! checkout exists before anything is linked out of it. Building performs
//! no I/O.

use declarative::{GraphError, PlanGraph};
use thiserror::Error;

use crate::config::Config;
use crate::facts::Fact;
use crate::operation::Operation;
use crate::profile::{Field, Repository, ValidatedProfile, ValidationError};
use crate::steps::{self, ShellStep, Site};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid plan template: {0}")]
    Graph(#[from] GraphError),
}

/// An operation's full plan, before pruning
#[derive(Debug, Clone)]
pub struct Template {
    pub operation: Operation,
    pub graph: PlanGraph,
    /// Every fact the template's checks read, without duplicates
    pub facts: Vec<Fact>,
}

struct TemplateBuilder {
    graph: PlanGraph,
    facts: Vec<Fact>,
}

impl TemplateBuilder {
    fn new() -> Self {
        Self {
            graph: PlanGraph::new(),
            facts: Vec::new(),
        }
    }

    fn add(&mut self, step: ShellStep, after: &[&str]) -> Result<(), GraphError> {
        for fact in step.facts() {
            if !self.facts.iter().any(|f| f.key() == fact.key()) {
                self.facts.push(fact.clone());
            }
        }
        self.graph.add(step, after)
    }

    /// Add steps so each runs after the one before it
    fn chain(&mut self, steps: Vec<ShellStep>) -> Result<(), GraphError> {
        let mut previous: Option<&'static str> = None;
        for step in steps {
            let id = step.static_id();
            match previous {
                Some(p) => self.add(step, &[p])?,
                None => self.add(step, &[])?,
            }
            previous = Some(id);
        }
        Ok(())
    }

    fn finish(self, operation: Operation) -> Result<Template, BuildError> {
        self.graph.validate()?;
        Ok(Template {
            operation,
            graph: self.graph,
            facts: self.facts,
        })
    }
}

fn repository(profile: &ValidatedProfile) -> Result<&Repository, ValidationError> {
    profile
        .repository
        .as_ref()
        .ok_or(ValidationError::MissingField(Field::ProjectRepo))
}

/// Facts the checks of `operation`'s template read, to query before
/// reconciling
pub fn facts(
    operation: Operation,
    profile: &ValidatedProfile,
    config: &Config,
) -> Result<Vec<Fact>, BuildError> {
    Ok(build(operation, profile, config)?.facts)
}

/// Build the template for `operation`
pub fn build(
    operation: Operation,
    profile: &ValidatedProfile,
    config: &Config,
) -> Result<Template, BuildError> {
    use steps::*;

    let site = Site::new(profile, config);
    let mut t = TemplateBuilder::new();

    match operation {
        Operation::Setup => t.chain(vec![
            create_home_dir(&site),
            create_user(&site),
            chown_home(&site),
            create_virtualenv(&site),
            create_subdirs(&site),
            generate_ssh_key(&site),
        ])?,
        Operation::Bootstrap => {
            let repo = repository(profile)?;
            t.add(clone_repo(&site, repo), &[])?;
            t.add(install_dependencies(&site), &[CLONE_REPO])?;
            t.add(link_nginx_config(&site), &[CLONE_REPO])?;
            t.add(link_init_config(&site), &[CLONE_REPO])?;
        }
        Operation::Deploy => t.add(pull_repo(&site, repository(profile)?), &[])?,
        Operation::Redeploy => {
            let repo = repository(profile)?;
            t.chain(vec![remove_app_dir(&site, true), clone_repo(&site, repo)])?;
        }
        Operation::Destroy => {
            t.add(stop_service(&site), &[])?;
            t.add(unlink_nginx_config(&site), &[STOP_SERVICE])?;
            t.add(reload_nginx(&site, true), &[UNLINK_NGINX_CONFIG])?;
            t.add(unlink_init_config(&site), &[UNLINK_NGINX_CONFIG])?;
            t.add(remove_app_dir(&site, false), &[UNLINK_INIT_CONFIG])?;
            t.add(remove_home_dir(&site), &[REMOVE_APP_DIR])?;
            t.add(remove_user(&site), &[REMOVE_HOME_DIR])?;
        }
        Operation::InstallMods => t.add(install_dependencies(&site), &[])?,
        Operation::InstallCrontab => t.add(install_crontab(&site), &[])?,
        Operation::LinkNginx => t.add(link_nginx_config(&site), &[])?,
        Operation::UnlinkNginx => t.add(unlink_nginx_config(&site), &[])?,
        Operation::LinkInit => t.add(link_init_config(&site), &[])?,
        Operation::UnlinkInit => t.add(unlink_init_config(&site), &[])?,
        Operation::Start => t.add(start_service(&site), &[])?,
        Operation::Stop => t.add(stop_service(&site), &[])?,
        Operation::Restart => t.add(restart_service(&site), &[])?,
        Operation::RemoveApp => t.add(remove_app_dir(&site, false), &[])?,
        Operation::ReloadNginx => t.add(reload_nginx(&site, false), &[])?,
    }

    t.finish(operation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::validate;
    use crate::steps::testing;
    use crate::steps::*;

    fn template(operation: Operation) -> Template {
        let profile = validate(&testing::profile(), operation.required_fields()).unwrap();
        build(operation, &profile, &Config::default()).unwrap()
    }

    #[test]
    fn test_every_operation_builds_a_valid_graph() {
        for op in Operation::ALL {
            let t = template(op);
            assert!(!t.graph.is_empty(), "{op}");
            assert!(t.graph.validate().is_ok(), "{op}");
        }
    }

    #[test]
    fn test_facts_are_what_the_template_reads() {
        let profile = validate(&testing::profile(), Operation::Destroy.required_fields()).unwrap();
        let config = Config::default();
        let keys = |facts: &[Fact]| facts.iter().map(Fact::key).collect::<Vec<_>>();

        let wanted = facts(Operation::Destroy, &profile, &config).unwrap();
        assert_eq!(keys(&wanted), keys(&template(Operation::Destroy).facts));
        assert!(keys(&wanted).contains(&"dir:/srv/app".to_string()));
    }

    #[test]
    fn test_setup_is_a_chain() {
        let t = template(Operation::Setup);
        assert_eq!(
            t.graph.topological_order().unwrap(),
            vec![
                CREATE_HOME_DIR,
                CREATE_USER,
                CHOWN_HOME,
                CREATE_VIRTUALENV,
                CREATE_SUBDIRS,
                GENERATE_SSH_KEY
            ]
        );
        assert_eq!(t.graph.layers().unwrap().len(), 6);
    }

    #[test]
    fn test_bootstrap_leaves_are_independent() {
        let t = template(Operation::Bootstrap);
        let layers = t.graph.layers().unwrap();
        assert_eq!(layers[0], vec![CLONE_REPO]);
        assert_eq!(
            layers[1],
            vec![INSTALL_DEPENDENCIES, LINK_NGINX_CONFIG, LINK_INIT_CONFIG]
        );
        for leaf in &layers[1] {
            for other in layers[1].iter().filter(|o| *o != leaf) {
                assert!(!t.graph.has_path(leaf, other));
            }
        }
    }

    #[test]
    fn test_destroy_stops_before_removing() {
        let t = template(Operation::Destroy);
        let g = &t.graph;
        assert_eq!(g.len(), 7);
        assert!(g.has_path(STOP_SERVICE, UNLINK_NGINX_CONFIG));
        assert!(g.has_path(UNLINK_NGINX_CONFIG, UNLINK_INIT_CONFIG));
        assert!(g.has_path(UNLINK_INIT_CONFIG, REMOVE_APP_DIR));
        assert!(g.has_path(REMOVE_APP_DIR, REMOVE_HOME_DIR));
        assert!(g.has_path(REMOVE_HOME_DIR, REMOVE_USER));
        assert!(g.has_path(UNLINK_NGINX_CONFIG, RELOAD_NGINX));
        assert!(!g.has_path(RELOAD_NGINX, REMOVE_USER));
    }

    #[test]
    fn test_redeploy_removes_before_cloning() {
        let t = template(Operation::Redeploy);
        assert_eq!(
            t.graph.topological_order().unwrap(),
            vec![REMOVE_APP_DIR, CLONE_REPO]
        );
    }

    #[test]
    fn test_facts_are_collected_once() {
        let t = template(Operation::Destroy);
        let keys: Vec<String> = t.facts.iter().map(Fact::key).collect();
        assert!(keys.contains(&"service:site".to_string()));
        assert!(keys.contains(&"user:site".to_string()));
        assert!(keys.contains(&"pending-reload:nginx".to_string()));
        let mut unique = keys.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), keys.len());
    }

    #[test]
    fn test_missing_repository_is_a_validation_error() {
        let profile = validate(&testing::profile(), Operation::RemoveApp.required_fields()).unwrap();
        let err = build(Operation::Deploy, &profile, &Config::default()).unwrap_err();
        assert_eq!(
            err,
            BuildError::Validation(ValidationError::MissingField(Field::ProjectRepo))
        );
    }
}
