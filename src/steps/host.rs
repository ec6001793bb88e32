//! Site user, home directory, virtualenv and SSH key

use declarative::{RemoteCommand, ResourceState};

use super::{
    CHOWN_HOME, CREATE_HOME_DIR, CREATE_SUBDIRS, CREATE_USER, CREATE_VIRTUALENV, CREATED_MARKER,
    Check, Effect, GENERATE_SSH_KEY, REMOVE_HOME_DIR, REMOVE_USER, ShellStep, Site,
};
use crate::connection::quote;
use crate::facts::Fact;

/// Directories the application expects inside its home
pub const SUBDIRS: [&str; 5] = ["data", "logs", "tmp", "static", ".ssh"];

/// Private key generated for the site user, relative to home
pub const SSH_KEY: &str = ".ssh/id_rsa";

pub fn create_home_dir(site: &Site<'_>) -> ShellStep {
    let home = &site.profile.home;
    let dir = Fact::Dir(home.clone());
    let q = quote(home);
    ShellStep::new(CREATE_HOME_DIR, format!("Create home directory {home}"))
        .run(
            RemoteCommand::new(format!(
                "[ -d {q} ] || {{ mkdir -p {q} && echo {CREATED_MARKER}; }}"
            ))
            .sudo(),
        )
        .undo_if_created(RemoteCommand::new(format!("rm -rf {q}")).sudo())
        .satisfied_when(Check::Present(dir.key()))
        .effect(Effect::present(&dir))
        .effect(Effect::Forget(Fact::Owner(home.clone()).key()))
        .reads(dir)
}

pub fn create_user(site: &Site<'_>) -> ShellStep {
    let user = quote(site.user());
    let fact = Fact::User(site.user().to_string());
    ShellStep::new(CREATE_USER, format!("Create user {}", site.user()))
        .run(
            RemoteCommand::new(format!(
                "useradd -U -d {} {user} && echo \"uid=$(id -u {user}) gid=$(id -g {user})\"",
                quote(&site.profile.home)
            ))
            .sudo(),
        )
        .undo_with(RemoteCommand::new(format!("userdel {user}")).sudo())
        .satisfied_when(Check::Present(fact.key()))
        .effect(Effect::present(&fact))
        .reads(fact)
}

pub fn chown_home(site: &Site<'_>) -> ShellStep {
    let home = &site.profile.home;
    let owner = format!("{}:{}", site.user(), site.profile.project_group);
    let fact = Fact::Owner(home.clone());
    ShellStep::new(CHOWN_HOME, format!("Give {home} to {owner}"))
        .run(RemoteCommand::new(format!("chown -R {} {}", quote(&owner), quote(home))).sudo())
        .satisfied_when(Check::Details {
            key: fact.key(),
            expected: vec![owner.clone()],
        })
        .effect(Effect::Set(fact.key(), ResourceState::present_with(owner)))
        .reads(fact)
}

pub fn create_virtualenv(site: &Site<'_>) -> ShellStep {
    let venv = site.profile.venv();
    let fact = Fact::Venv(venv.to_string());
    ShellStep::new(CREATE_VIRTUALENV, format!("Create virtualenv in {venv}"))
        .run(
            RemoteCommand::new(format!("virtualenv --clear {}", quote(venv)))
                .as_user(site.user()),
        )
        .satisfied_when(Check::Present(fact.key()))
        .effect(Effect::present(&fact))
        .reads(fact)
}

pub fn create_subdirs(site: &Site<'_>) -> ShellStep {
    let dirs: Vec<Fact> = SUBDIRS
        .iter()
        .map(|d| Fact::Dir(site.profile.home_path(d)))
        .collect();

    let mut step = ShellStep::new(CREATE_SUBDIRS, "Create data, logs, tmp, static and .ssh")
        .run(
            RemoteCommand::new(format!("mkdir -p {}", SUBDIRS.join(" ")))
                .as_user(site.user())
                .in_dir(&site.profile.home),
        )
        .satisfied_when(Check::All(
            dirs.iter().map(|d| Check::Present(d.key())).collect(),
        ));
    for dir in dirs {
        step = step.effect(Effect::present(&dir)).reads(dir);
    }
    step
}

/// Generate the site user's key pair and print the public half
pub fn generate_ssh_key(site: &Site<'_>) -> ShellStep {
    let key = site.profile.home_path(SSH_KEY);
    let fact = Fact::File(key.clone());
    let q = quote(&key);
    ShellStep::new(GENERATE_SSH_KEY, format!("Generate SSH key {key}"))
        .run(
            RemoteCommand::new(format!(
                "[ -f {q} ] || {{ ssh-keygen -q -t rsa -f {q} -N '' && echo {CREATED_MARKER}; }}; cat {q}.pub"
            ))
            .as_user(site.user()),
        )
        .undo_if_created(RemoteCommand::new(format!("rm -f {q} {q}.pub")).sudo())
        .satisfied_when(Check::Present(fact.key()))
        .effect(Effect::present(&fact))
        .reads(fact)
}

pub fn remove_home_dir(site: &Site<'_>) -> ShellStep {
    let home = &site.profile.home;
    let dir = Fact::Dir(home.clone());
    ShellStep::new(REMOVE_HOME_DIR, format!("Remove home directory {home}"))
        .run(RemoteCommand::new(format!("rm -rf {}", quote(home))).sudo())
        .satisfied_when(Check::Absent(dir.key()))
        .effect(Effect::AbsentUnder(home.clone()))
        .effect(Effect::absent(&dir))
        .reads(dir)
}

pub fn remove_user(site: &Site<'_>) -> ShellStep {
    let fact = Fact::User(site.user().to_string());
    ShellStep::new(REMOVE_USER, format!("Remove user {}", site.user()))
        .run(RemoteCommand::new(format!("userdel {}", quote(site.user()))).sudo())
        .satisfied_when(Check::Absent(fact.key()))
        .effect(Effect::absent(&fact))
        .reads(fact)
}
