//! Catalogue of operations and the profile fields each one requires

use std::fmt;
use std::str::FromStr;

use crate::profile::Field;
use crate::profile::Field::{
    Home, Host, ProjectGroup, ProjectName, ProjectRepo, ProjectUrl, ProjectUser,
};

/// A requested deployment operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Setup,
    Bootstrap,
    Deploy,
    Redeploy,
    Destroy,
    InstallMods,
    InstallCrontab,
    LinkNginx,
    UnlinkNginx,
    LinkInit,
    UnlinkInit,
    Start,
    Stop,
    Restart,
    RemoveApp,
    ReloadNginx,
}

impl Operation {
    pub const ALL: [Self; 16] = [
        Self::Setup,
        Self::Bootstrap,
        Self::Deploy,
        Self::Redeploy,
        Self::Destroy,
        Self::InstallMods,
        Self::InstallCrontab,
        Self::LinkNginx,
        Self::UnlinkNginx,
        Self::LinkInit,
        Self::UnlinkInit,
        Self::Start,
        Self::Stop,
        Self::Restart,
        Self::RemoveApp,
        Self::ReloadNginx,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Bootstrap => "bootstrap",
            Self::Deploy => "deploy",
            Self::Redeploy => "redeploy",
            Self::Destroy => "destroy",
            Self::InstallMods => "install_mods",
            Self::InstallCrontab => "install_crontab",
            Self::LinkNginx => "link_nginx",
            Self::UnlinkNginx => "unlink_nginx",
            Self::LinkInit => "link_init",
            Self::UnlinkInit => "unlink_init",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::RemoveApp => "remove_app",
            Self::ReloadNginx => "reload_nginx",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Setup => "Create the site user, home directory, virtualenv and SSH key",
            Self::Bootstrap => "Clone the project, install dependencies and link configs",
            Self::Deploy => "Pull the latest revision of the project",
            Self::Redeploy => "Remove the checkout and clone it again",
            Self::Destroy => "Stop the service and remove everything setup created",
            Self::InstallMods => "Install Python dependencies into the virtualenv",
            Self::InstallCrontab => "Install the project's crontab",
            Self::LinkNginx => "Link the nginx site config",
            Self::UnlinkNginx => "Unlink the nginx site config",
            Self::LinkInit => "Install the service init config",
            Self::UnlinkInit => "Remove the service init config",
            Self::Start => "Start the service",
            Self::Stop => "Stop the service",
            Self::Restart => "Restart the service",
            Self::RemoveApp => "Remove the checkout so the site can be bootstrapped again",
            Self::ReloadNginx => "Reload nginx",
        }
    }

    /// Fields that must be present, in the order they are checked
    pub fn required_fields(self) -> &'static [Field] {
        match self {
            Self::Setup => &[Host, Home, ProjectUser, ProjectGroup],
            Self::Bootstrap => &[Host, Home, ProjectName, ProjectRepo, ProjectUrl, ProjectUser],
            Self::Deploy | Self::Redeploy => &[Host, Home, ProjectName, ProjectUser, ProjectRepo],
            Self::Destroy => &[Host, Home, ProjectName, ProjectUser, ProjectRepo, ProjectUrl],
            Self::InstallMods | Self::InstallCrontab => &[Host, Home, ProjectName, ProjectUser],
            Self::LinkNginx => &[Host, Home, ProjectName, ProjectUrl],
            Self::UnlinkNginx => &[Host, ProjectUrl],
            Self::LinkInit => &[Host, Home, ProjectName],
            Self::UnlinkInit => &[Host, ProjectName],
            Self::Start | Self::Stop | Self::Restart => &[Host, ProjectName],
            Self::RemoveApp => &[Host, Home, ProjectName],
            Self::ReloadNginx => &[Host],
        }
    }

    /// Whether planning this operation needs a confirmation token
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::Destroy | Self::Redeploy | Self::RemoveApp)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|op| op.name() == normalized)
            .ok_or_else(|| format!("unknown operation '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.name().parse::<Operation>(), Ok(op));
        }
        assert_eq!("install-mods".parse::<Operation>(), Ok(Operation::InstallMods));
        assert!("launch".parse::<Operation>().is_err());
    }

    #[test]
    fn test_destroy_requires_deploy_fields_and_url() {
        let deploy = Operation::Deploy.required_fields();
        let destroy = Operation::Destroy.required_fields();
        assert!(deploy.iter().all(|f| destroy.contains(f)));
        assert!(destroy.contains(&Field::ProjectUrl));
    }

    #[test]
    fn test_every_operation_requires_host() {
        for op in Operation::ALL {
            assert_eq!(op.required_fields().first(), Some(&Field::Host), "{op}");
        }
    }

    #[test]
    fn test_destructive_operations() {
        let destructive: Vec<_> = Operation::ALL
            .into_iter()
            .filter(|op| op.is_destructive())
            .collect();
        assert_eq!(
            destructive,
            vec![Operation::Redeploy, Operation::Destroy, Operation::RemoveApp]
        );
    }
}
