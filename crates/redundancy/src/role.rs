//! Role and BMC state enumerations as they travel on the bus.

use std::fmt;
use std::str::FromStr;

use crate::Error;

const ROLE_PREFIX: &str = "xyz.openbmc_project.State.BMC.Redundancy.Role.";
const BMC_STATE_PREFIX: &str = "xyz.openbmc_project.State.BMC.BMCState.";

/// The redundancy role of a controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Role {
    /// Not yet determined.
    #[default]
    Unknown,

    /// Owns the shared hardware and state.
    Active,

    /// Stands by for failover.
    Passive,
}

impl Role {
    /// The fully-qualified bus representation.
    #[must_use]
    pub const fn as_bus_str(&self) -> &'static str {
        match self {
            Self::Unknown => "xyz.openbmc_project.State.BMC.Redundancy.Role.Unknown",
            Self::Active => "xyz.openbmc_project.State.BMC.Redundancy.Role.Active",
            Self::Passive => "xyz.openbmc_project.State.BMC.Redundancy.Role.Passive",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Active => write!(f, "Active"),
            Self::Passive => write!(f, "Passive"),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(ROLE_PREFIX).unwrap_or(s) {
            "Unknown" => Ok(Self::Unknown),
            "Active" => Ok(Self::Active),
            "Passive" => Ok(Self::Passive),
            _ => Err(Error::InvalidProperty {
                property: "Role".to_string(),
                reason: format!("unknown role {s:?}"),
            }),
        }
    }
}

/// The overall state of a controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BmcState {
    /// Fully up.
    Ready,

    /// Still booting.
    NotReady,

    /// Up, but in a degraded, quiesced state.
    Quiesced,

    /// A firmware update is being applied.
    UpdateInProgress,
}

impl BmcState {
    /// The fully-qualified bus representation.
    #[must_use]
    pub const fn as_bus_str(&self) -> &'static str {
        match self {
            Self::Ready => "xyz.openbmc_project.State.BMC.BMCState.Ready",
            Self::NotReady => "xyz.openbmc_project.State.BMC.BMCState.NotReady",
            Self::Quiesced => "xyz.openbmc_project.State.BMC.BMCState.Quiesced",
            Self::UpdateInProgress => "xyz.openbmc_project.State.BMC.BMCState.UpdateInProgress",
        }
    }
}

impl FromStr for BmcState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(BMC_STATE_PREFIX).unwrap_or(s) {
            "Ready" => Ok(Self::Ready),
            "NotReady" => Ok(Self::NotReady),
            "Quiesced" => Ok(Self::Quiesced),
            "UpdateInProgress" => Ok(Self::UpdateInProgress),
            _ => Err(Error::InvalidProperty {
                property: "BMCState".to_string(),
                reason: format!("unknown BMC state {s:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parses_qualified_and_short_forms() {
        for role in [Role::Unknown, Role::Active, Role::Passive] {
            assert_eq!(role.as_bus_str().parse::<Role>().unwrap(), role);
        }

        assert_eq!("Passive".parse::<Role>().unwrap(), Role::Passive);
        assert!("xyz.openbmc_project.State.BMC.Redundancy.Role.Leader".parse::<Role>().is_err());
    }

    #[test]
    fn test_bmc_state_parses_qualified_form() {
        assert_eq!(
            "xyz.openbmc_project.State.BMC.BMCState.Quiesced"
                .parse::<BmcState>()
                .unwrap(),
            BmcState::Quiesced
        );
        assert!("Sleeping".parse::<BmcState>().is_err());
    }
}
