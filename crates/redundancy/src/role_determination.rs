//! Decides whether this controller claims the Active or Passive role.
//!
//! The rules are evaluated in a fixed order and the first match wins; the order
//! itself is part of the contract.

use crate::Role;

use tracing::{error, info};

/// Inputs to the role determination function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Input {
    /// This controller's position.
    pub bmc_position: usize,

    /// The sibling's reported position, if known.
    pub sibling_position: Option<usize>,

    /// The sibling's last known role.
    pub sibling_role: Role,

    /// Whether the sibling is present with a fresh heartbeat.
    pub sibling_heartbeat: bool,

    /// Whether the sibling reports itself provisioned.
    pub sibling_provisioned: bool,
}

/// Role determination error cases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCase {
    /// The role was determined normally.
    #[default]
    NoError,

    /// Determination failed internally; the role was forced.
    InternalError,

    /// Both controllers report the same position.
    SamePositions,
}

/// The role and the error reason returned from [`run`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleInfo {
    /// The chosen role.
    pub role: Role,

    /// Why the role was chosen, when it was not a normal decision.
    pub error: ErrorCase,
}

impl RoleInfo {
    const fn new(role: Role, error: ErrorCase) -> Self {
        Self { role, error }
    }

    /// The verdict used when determination itself fails.
    #[must_use]
    pub const fn internal_error() -> Self {
        Self::new(Role::Passive, ErrorCase::InternalError)
    }
}

/// Determines if this controller should claim the Active or Passive role.
#[must_use]
pub fn run(input: &Input) -> RoleInfo {
    use ErrorCase::{NoError, SamePositions};
    use Role::{Active, Passive};

    // Nothing below may read sibling fields without a live sibling.
    if !input.sibling_heartbeat {
        info!("Role = active since no sibling heartbeat");
        return RoleInfo::new(Active, NoError);
    }

    if input.sibling_position == Some(input.bmc_position) {
        error!(
            "Role = passive due to both BMCs having position {}",
            input.bmc_position
        );
        return RoleInfo::new(Passive, SamePositions);
    }

    if !input.sibling_provisioned {
        info!("Role = active since sibling isn't provisioned");
        return RoleInfo::new(Active, NoError);
    }

    match input.sibling_role {
        Role::Passive => {
            info!("Role = active because sibling is already passive");
            return RoleInfo::new(Active, NoError);
        }
        Role::Active => {
            info!("Role = passive because sibling is already active");
            return RoleInfo::new(Passive, NoError);
        }
        Role::Unknown => {}
    }

    if input.bmc_position == 0 {
        info!("Role = active due to BMC position 0");
        return RoleInfo::new(Active, NoError);
    }

    info!("Role = passive due to BMC position {}", input.bmc_position);
    RoleInfo::new(Passive, NoError)
}

/// Determines the role when there is no sibling concept at all, as on a
/// single-controller chassis.
#[must_use]
pub fn run_without_sibling(bmc_position: usize) -> RoleInfo {
    if bmc_position == 0 {
        info!("Role = active due to BMC position 0");
        RoleInfo::new(Role::Active, ErrorCase::NoError)
    } else {
        info!("Role = passive due to BMC position {}", bmc_position);
        RoleInfo::new(Role::Passive, ErrorCase::NoError)
    }
}
