//! nginx site and init config links

use declarative::{RemoteCommand, ResourceState};

use super::{
    Check, Effect, LINK_INIT_CONFIG, LINK_NGINX_CONFIG, RELOAD_NGINX, ShellStep, Site,
    UNLINK_INIT_CONFIG, UNLINK_NGINX_CONFIG, first_existing,
};
use crate::config::ServiceManager;
use crate::connection::quote;
use crate::facts::Fact;

pub fn link_nginx_config(site: &Site<'_>) -> ShellStep {
    let target = site.nginx_site();
    let sources = site.nginx_sources();
    let link = Fact::Link(target.clone());
    let details = sources.first().cloned().unwrap_or_default();

    ShellStep::new(LINK_NGINX_CONFIG, format!("Link nginx site {target}"))
        .run(
            RemoteCommand::new(first_existing(
                &sources,
                &format!("ln -sfn \"$f\" {}", quote(&target)),
            ))
            .sudo(),
        )
        .undo_with(RemoteCommand::new(format!("rm -f {}", quote(&target))).sudo())
        .satisfied_when(Check::Details {
            key: link.key(),
            expected: sources,
        })
        .effect(Effect::Set(link.key(), ResourceState::present_with(details)))
        .reads(link)
}

/// Remove the nginx site; nginx owes a reload afterwards
pub fn unlink_nginx_config(site: &Site<'_>) -> ShellStep {
    let target = site.nginx_site();
    let link = Fact::Link(target.clone());

    ShellStep::new(UNLINK_NGINX_CONFIG, format!("Unlink nginx site {target}"))
        .run(RemoteCommand::new(format!("rm -f {}", quote(&target))).sudo())
        .satisfied_when(Check::Absent(link.key()))
        .effect(Effect::absent(&link))
        .effect(Effect::present(&site.nginx_reload_fact()))
        .reads(link)
}

/// Reload nginx; with `when_pending` only if a site change is still owed
pub fn reload_nginx(site: &Site<'_>, when_pending: bool) -> ShellStep {
    let service = &site.config.service.nginx_service;
    let pending = site.nginx_reload_fact();
    let command = match site.config.service.manager {
        ServiceManager::Upstart => format!("/etc/init.d/{service} reload"),
        ServiceManager::Systemd => format!("systemctl reload {}", quote(service)),
    };
    let check = if when_pending {
        Check::Absent(pending.key())
    } else {
        Check::Never
    };

    ShellStep::new(RELOAD_NGINX, format!("Reload {service}"))
        .run(RemoteCommand::new(command).sudo())
        .satisfied_when(check)
        .effect(Effect::absent(&pending))
        .reads(pending)
}

pub fn link_init_config(site: &Site<'_>) -> ShellStep {
    let dest = site.init_config();
    let installed = Fact::Installed {
        dest: dest.clone(),
        sources: site.init_sources(),
    };

    let mut step = ShellStep::new(LINK_INIT_CONFIG, format!("Install init config {dest}"))
        .run(
            RemoteCommand::new(first_existing(
                &site.init_sources(),
                &format!("cp \"$f\" {}", quote(&dest)),
            ))
            .sudo(),
        )
        .undo_with(RemoteCommand::new(format!("rm -f {}", quote(&dest))).sudo());
    if let Some(reload) = site.init_changed() {
        step = step.run(reload.clone()).undo_with(reload);
    }

    step.satisfied_when(Check::Present(installed.key()))
        .effect(Effect::present(&installed))
        .effect(Effect::present(&Fact::File(dest)))
        .reads(installed)
}

pub fn unlink_init_config(site: &Site<'_>) -> ShellStep {
    let dest = site.init_config();
    let file = Fact::File(dest.clone());
    let installed = Fact::Installed {
        dest: dest.clone(),
        sources: Vec::new(),
    };

    let mut step = ShellStep::new(UNLINK_INIT_CONFIG, format!("Remove init config {dest}"))
        .run(RemoteCommand::new(format!("rm -f {}", quote(&dest))).sudo());
    if let Some(reload) = site.init_changed() {
        step = step.run(reload);
    }

    step.satisfied_when(Check::Absent(file.key()))
        .effect(Effect::absent(&file))
        .effect(Effect::absent(&installed))
        .reads(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::steps::testing;
    use declarative::{CheckOutcome, ObservedState, Step};

    #[test]
    fn test_link_accepts_any_candidate() {
        let profile = testing::validated();
        let config = Config::default();
        let step = link_nginx_config(&Site::new(&profile, &config));

        let mut observed = ObservedState::new();
        observed.set(
            "link:/etc/nginx/sites-enabled/site.example.com",
            ResourceState::present_with("/srv/app/site/etc/nginx.staging.conf"),
        );
        assert_eq!(step.check(&observed), CheckOutcome::Satisfied);

        observed.set(
            "link:/etc/nginx/sites-enabled/site.example.com",
            ResourceState::present_with("/tmp/elsewhere.conf"),
        );
        assert_eq!(step.check(&observed), CheckOutcome::Unsatisfied);
    }

    #[test]
    fn test_unlink_leaves_reload_pending() {
        let profile = testing::validated();
        let config = Config::default();
        let site = Site::new(&profile, &config);
        let unlink = unlink_nginx_config(&site);
        let reload = reload_nginx(&site, true);

        let mut observed = ObservedState::new();
        observed.set("pending-reload:nginx", ResourceState::Absent);
        assert_eq!(reload.check(&observed), CheckOutcome::Satisfied);

        unlink.effects(&mut observed);
        assert_eq!(reload.check(&observed), CheckOutcome::Unsatisfied);

        reload.effects(&mut observed);
        assert_eq!(reload.check(&observed), CheckOutcome::Satisfied);
        assert_eq!(
            reload_nginx(&site, false).check(&observed),
            CheckOutcome::Unsatisfied
        );
    }

    #[test]
    fn test_upstart_reload_uses_init_script() {
        let profile = testing::validated();
        let config = Config::default();
        let step = reload_nginx(&Site::new(&profile, &config), false);
        assert_eq!(step.commands()[0].command, "/etc/init.d/nginx reload");
        assert!(step.commands()[0].sudo);
    }

    #[test]
    fn test_systemd_init_config_reloads_daemon() {
        let profile = testing::validated();
        let mut config = Config::default();
        config.service.manager = ServiceManager::Systemd;
        let step = link_init_config(&Site::new(&profile, &config));

        let commands = step.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].command.contains("/srv/app/site/etc/systemd.service"));
        assert!(commands[0].command.contains("cp \"$f\" /etc/systemd/system/site.service"));
        assert_eq!(commands[1].command, "systemctl daemon-reload");
    }

    #[test]
    fn test_upstart_init_config_is_copied() {
        let profile = testing::validated();
        let config = Config::default();
        let step = link_init_config(&Site::new(&profile, &config));
        assert_eq!(step.commands().len(), 1);
        assert!(step.commands()[0].command.contains("/srv/app/site/etc/upstart.staging.conf"));
        assert!(step.can_rollback());
    }
}
