use super::{SiblingAttributes, SiblingSnapshot};
use crate::{BmcState, Error, Result, Role};

use rbmc_bus::names::property;
use rbmc_bus::{PropertyMap, ValueTypeError};

/// The cached sibling state, as mutated by the watch loops.
#[derive(Debug, Default)]
pub struct SiblingState {
    pub interface_present: bool,
    pub heartbeat: bool,
    attributes: SiblingAttributes,
}

impl SiblingState {
    /// Merges `update` in; fields it doesn't carry are left untouched.
    pub fn apply(&mut self, update: SiblingUpdate) {
        let SiblingUpdate {
            attributes,
            heartbeat,
        } = update;
        let cached = &mut self.attributes;

        if attributes.position.is_some() {
            cached.position = attributes.position;
        }
        if attributes.fw_version.is_some() {
            cached.fw_version = attributes.fw_version;
        }
        if attributes.provisioned.is_some() {
            cached.provisioned = attributes.provisioned;
        }
        if attributes.redundancy_enabled.is_some() {
            cached.redundancy_enabled = attributes.redundancy_enabled;
        }
        if attributes.failovers_paused.is_some() {
            cached.failovers_paused = attributes.failovers_paused;
        }
        if attributes.bmc_state.is_some() {
            cached.bmc_state = attributes.bmc_state;
        }
        if attributes.role.is_some() {
            cached.role = attributes.role;
        }
        if attributes.comms_ok.is_some() {
            cached.comms_ok = attributes.comms_ok;
        }
        if let Some(heartbeat) = heartbeat {
            self.heartbeat = heartbeat;
        }
    }

    /// The sibling went away: presence and heartbeat drop together.
    pub fn clear_presence(&mut self) {
        self.interface_present = false;
        self.heartbeat = false;
    }

    pub fn snapshot(&self) -> SiblingSnapshot {
        SiblingSnapshot::new(
            self.interface_present,
            self.heartbeat,
            self.attributes.clone(),
        )
    }
}

/// The sibling properties carried by one property map.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SiblingUpdate {
    attributes: SiblingAttributes,
    heartbeat: Option<bool>,
}

impl SiblingUpdate {
    /// Parses every known sibling property in `properties`. Unknown names are
    /// ignored.
    ///
    /// Fails without a partial result if any known property is malformed.
    pub fn parse(properties: &PropertyMap) -> Result<Self> {
        let mut update = Self::default();
        let attributes = &mut update.attributes;

        for (name, value) in properties {
            match name.as_str() {
                property::BMC_POSITION => {
                    let position = typed(name, value.as_u64())?;
                    attributes.position =
                        Some(usize::try_from(position).map_err(|e| invalid(name, &e))?);
                }
                property::FW_VERSION => {
                    attributes.fw_version = Some(typed(name, value.as_str())?.to_string());
                }
                property::PROVISIONED => {
                    attributes.provisioned = Some(typed(name, value.as_bool())?);
                }
                property::REDUNDANCY_ENABLED => {
                    attributes.redundancy_enabled = Some(typed(name, value.as_bool())?);
                }
                property::FAILOVERS_PAUSED => {
                    attributes.failovers_paused = Some(typed(name, value.as_bool())?);
                }
                property::BMC_STATE => {
                    attributes.bmc_state = Some(typed(name, value.as_str())?.parse::<BmcState>()?);
                }
                property::ROLE => {
                    attributes.role = Some(typed(name, value.as_str())?.parse::<Role>()?);
                }
                property::COMMUNICATION_OK => {
                    attributes.comms_ok = Some(typed(name, value.as_bool())?);
                }
                property::HEARTBEAT => {
                    update.heartbeat = Some(typed(name, value.as_bool())?);
                }
                _ => {}
            }
        }

        Ok(update)
    }
}

fn typed<T>(name: &str, value: std::result::Result<T, ValueTypeError>) -> Result<T> {
    value.map_err(|e| invalid(name, &e))
}

fn invalid(name: &str, reason: &dyn std::fmt::Display) -> Error {
    Error::InvalidProperty {
        property: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Builds a property map from `(name, value)` pairs.
#[cfg(test)]
pub fn properties<const N: usize>(entries: [(&str, rbmc_bus::PropertyValue); N]) -> PropertyMap {
    entries
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}
