//! Project checkout, dependencies and crontab

use declarative::{RemoteCommand, ResourceState};

use super::{
    CLONE_REPO, Check, Effect, INSTALL_CRONTAB, INSTALL_DEPENDENCIES, PULL_REPO, REMOVE_APP_DIR,
    ShellStep, Site, first_existing,
};
use crate::connection::quote;
use crate::facts::Fact;
use crate::profile::{Repository, Vcs};

fn checkout(site: &Site<'_>, repo: &Repository) -> Fact {
    Fact::Checkout {
        dir: site.profile.project_dir(),
        vcs: repo.vcs(),
        user: site.user().to_string(),
    }
}

pub fn clone_repo(site: &Site<'_>, repo: &Repository) -> ShellStep {
    let dir = site.profile.project_dir();
    let url = repo.clone_url(&site.config.repo.pull_protocol);
    let program = match repo.vcs() {
        Vcs::Git => "git",
        Vcs::Mercurial => "hg",
    };
    let fact = checkout(site, repo);

    ShellStep::new(CLONE_REPO, format!("Clone {url} into {dir}"))
        .run(
            RemoteCommand::new(format!(
                "{program} clone {} {}",
                quote(&url),
                quote(&site.profile.project_name)
            ))
            .as_user(site.user())
            .in_dir(&site.profile.home),
        )
        .undo_with(RemoteCommand::new(format!("rm -rf {}", quote(&dir))).sudo())
        .satisfied_when(Check::Details {
            key: fact.key(),
            expected: vec![url.clone()],
        })
        .effect(Effect::Set(fact.key(), ResourceState::present_with(url)))
        .effect(Effect::Set(Fact::Dir(dir.clone()).key(), ResourceState::present()))
        .effect(Effect::Forget(
            Fact::Revision {
                dir: dir.clone(),
                vcs: repo.vcs(),
                user: site.user().to_string(),
            }
            .key(),
        ))
        .effect(Effect::absent(&Fact::Deps(dir)))
        .reads(fact)
}

/// Bring the checkout up to date with its upstream branch
pub fn pull_repo(site: &Site<'_>, repo: &Repository) -> ShellStep {
    let dir = site.profile.project_dir();
    let user = site.user().to_string();
    let vcs = repo.vcs();
    let pull = match vcs {
        Vcs::Git => format!("git pull origin {}", quote(&site.config.repo.branch)),
        Vcs::Mercurial => "hg pull -u".to_string(),
    };
    let local = Fact::Revision {
        dir: dir.clone(),
        vcs,
        user: user.clone(),
    };
    let remote = Fact::RemoteRevision {
        dir: dir.clone(),
        vcs,
        user: user.clone(),
        branch: site.config.repo.branch.clone(),
    };

    ShellStep::new(PULL_REPO, format!("Pull latest revision into {dir}"))
        .run(RemoteCommand::new(pull).as_user(user).in_dir(&dir))
        .satisfied_when(Check::Matches {
            key: local.key(),
            other: remote.key(),
        })
        .effect(Effect::Copy {
            from: remote.key(),
            to: local.key(),
        })
        .effect(Effect::absent(&Fact::Deps(dir)))
        .reads(local)
        .reads(remote)
}

/// Install the checkout's requirements into the virtualenv
pub fn install_dependencies(site: &Site<'_>) -> ShellStep {
    let dir = site.profile.project_dir();
    let deps = Fact::Deps(dir.clone());
    let install = format!(
        "{} install -q -r \"$f\" --log={}",
        quote(&site.profile.venv_bin("pip")),
        quote(&site.profile.home_path("logs/pip.log"))
    );

    ShellStep::new(INSTALL_DEPENDENCIES, format!("Install requirements of {dir}"))
        .run(
            RemoteCommand::new(first_existing(&site.requirements_sources(), &install))
                .as_user(site.user()),
        )
        .satisfied_when(Check::Present(deps.key()))
        .effect(Effect::present(&deps))
        .reads(deps)
}

pub fn install_crontab(site: &Site<'_>) -> ShellStep {
    let sources = site.crontab_sources();
    let fact = Fact::Crontab {
        user: site.user().to_string(),
        sources: sources.clone(),
    };
    let install = format!("crontab -u {} \"$f\"", quote(site.user()));

    ShellStep::new(INSTALL_CRONTAB, format!("Install crontab for {}", site.user()))
        .run(RemoteCommand::new(first_existing(&sources, &install)).sudo())
        .satisfied_when(Check::Present(fact.key()))
        .effect(Effect::present(&fact))
        .reads(fact)
}

/// Remove the checkout; `forced` steps run even when it is already gone
pub fn remove_app_dir(site: &Site<'_>, forced: bool) -> ShellStep {
    let dir = site.profile.project_dir();
    let fact = Fact::Dir(dir.clone());
    let check = if forced {
        Check::Never
    } else {
        Check::Absent(fact.key())
    };

    ShellStep::new(REMOVE_APP_DIR, format!("Remove checkout {dir}"))
        .run(RemoteCommand::new(format!("rm -rf {}", quote(&dir))).sudo())
        .satisfied_when(check)
        .effect(Effect::AbsentUnder(dir))
        .effect(Effect::absent(&fact))
        .reads(fact)
}
