//! Role-specific startup work.

use crate::Role;

use rbmc_services::{Services, UnitState};
use tracing::{error, info};

/// Systemd target started when this controller is Active.
pub const ACTIVE_TARGET: &str = "obmc-bmc-active.target";

/// Systemd target started when this controller is Passive.
pub const PASSIVE_TARGET: &str = "obmc-bmc-passive.target";

/// The handler for the role this controller was assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleHandler {
    /// Active role work.
    Active,

    /// Passive role work.
    Passive,
}

impl RoleHandler {
    /// Picks the handler for `role`. There is none for `Role::Unknown`.
    #[must_use]
    pub const fn for_role(role: Role) -> Option<Self> {
        match role {
            Role::Active => Some(Self::Active),
            Role::Passive => Some(Self::Passive),
            Role::Unknown => None,
        }
    }

    /// The unit this handler starts.
    #[must_use]
    pub const fn target(&self) -> &'static str {
        match self {
            Self::Active => ACTIVE_TARGET,
            Self::Passive => PASSIVE_TARGET,
        }
    }

    /// Starts the role's target and waits for it to settle.
    ///
    /// Failures are logged, never returned.
    pub async fn start<S>(&self, services: &S)
    where
        S: Services,
    {
        let target = self.target();
        info!("starting {}", target);

        match services.start_unit(target).await {
            Ok(UnitState::Active) => info!("{} is active", target),
            Ok(UnitState::Failed) => error!("{} failed to start", target),
            Err(e) => error!("error starting {}: {}", target, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rbmc_services_memory::{MemoryServices, UnitOutcome};
    use tracing_test::traced_test;

    #[test]
    fn test_handler_per_role() {
        assert_eq!(RoleHandler::for_role(Role::Active), Some(RoleHandler::Active));
        assert_eq!(
            RoleHandler::for_role(Role::Passive),
            Some(RoleHandler::Passive)
        );
        assert_eq!(RoleHandler::for_role(Role::Unknown), None);
    }

    #[tokio::test]
    async fn test_start_launches_role_target() {
        let services = MemoryServices::default();

        RoleHandler::Active.start(&services).await;
        RoleHandler::Passive.start(&services).await;

        assert_eq!(
            services.started_units().await,
            vec![ACTIVE_TARGET.to_string(), PASSIVE_TARGET.to_string()]
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_start_failures_are_logged() {
        let services = MemoryServices::default();
        services
            .set_outcome(ACTIVE_TARGET, UnitOutcome::Settles(UnitState::Failed))
            .await;
        services
            .set_outcome(PASSIVE_TARGET, UnitOutcome::Errors)
            .await;

        RoleHandler::Active.start(&services).await;
        RoleHandler::Passive.start(&services).await;

        assert!(logs_contain("obmc-bmc-active.target failed to start"));
        assert!(logs_contain("error starting obmc-bmc-passive.target"));
    }
}
