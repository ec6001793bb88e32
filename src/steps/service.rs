//! Application service control

use declarative::RemoteCommand;

use super::{Check, Effect, RESTART_SERVICE, START_SERVICE, STOP_SERVICE, ShellStep, Site};

fn control(site: &Site<'_>, action: &str) -> RemoteCommand {
    site.service_command(action, &site.profile.project_name)
}

pub fn start_service(site: &Site<'_>) -> ShellStep {
    let service = site.service_fact();
    ShellStep::new(START_SERVICE, format!("Start {}", site.profile.project_name))
        .run(control(site, "start"))
        .undo_with(control(site, "stop"))
        .satisfied_when(Check::Present(service.key()))
        .effect(Effect::present(&service))
        .reads(service)
}

/// Stop the service; a rollback starts it again
pub fn stop_service(site: &Site<'_>) -> ShellStep {
    let service = site.service_fact();
    ShellStep::new(STOP_SERVICE, format!("Stop {}", site.profile.project_name))
        .run(control(site, "stop"))
        .undo_with(control(site, "start"))
        .satisfied_when(Check::Absent(service.key()))
        .effect(Effect::absent(&service))
        .reads(service)
}

pub fn restart_service(site: &Site<'_>) -> ShellStep {
    let service = site.service_fact();
    ShellStep::new(RESTART_SERVICE, format!("Restart {}", site.profile.project_name))
        .run(control(site, "restart"))
        .effect(Effect::present(&service))
        .reads(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ServiceManager};
    use crate::steps::testing;
    use declarative::{CheckOutcome, ObservedState, ResourceState, Step};

    #[test]
    fn test_upstart_commands() {
        let profile = testing::validated();
        let config = Config::default();
        let site = Site::new(&profile, &config);
        assert_eq!(start_service(&site).commands()[0].command, "start site");
        assert_eq!(stop_service(&site).commands()[0].command, "stop site");
        assert_eq!(restart_service(&site).commands()[0].command, "restart site");
    }

    #[test]
    fn test_systemd_commands() {
        let profile = testing::validated();
        let mut config = Config::default();
        config.service.manager = ServiceManager::Systemd;
        let site = Site::new(&profile, &config);
        assert_eq!(
            stop_service(&site).commands()[0].command,
            "systemctl stop site"
        );
    }

    #[test]
    fn test_stop_is_pruned_when_not_running() {
        let profile = testing::validated();
        let config = Config::default();
        let site = Site::new(&profile, &config);

        let mut observed = ObservedState::new();
        observed.set("service:site", ResourceState::Absent);
        assert_eq!(stop_service(&site).check(&observed), CheckOutcome::Satisfied);
        assert_eq!(start_service(&site).check(&observed), CheckOutcome::Unsatisfied);
        assert_eq!(
            restart_service(&site).check(&observed),
            CheckOutcome::Unsatisfied
        );
    }
}
