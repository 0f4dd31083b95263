//! Access to the sibling controller's state.
//!
//! Data is only ever handed out while the sibling's interface is present on the
//! bus and its heartbeat is active, meaning the code on the sibling is alive.
//! Stale values are never returned.

mod bus_sibling;
mod state;

pub use bus_sibling::{BusSibling, SiblingConfig};

use std::time::Duration;

use async_trait::async_trait;

use crate::{BmcState, Result, Role};

/// Attributes the sibling publishes about itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SiblingAttributes {
    /// Slot position.
    pub position: Option<usize>,

    /// Firmware version identifier.
    pub fw_version: Option<String>,

    /// Provisioning status.
    pub provisioned: Option<bool>,

    /// Whether redundancy is enabled.
    pub redundancy_enabled: Option<bool>,

    /// Whether failovers are paused.
    pub failovers_paused: Option<bool>,

    /// Overall BMC state.
    pub bmc_state: Option<BmcState>,

    /// Redundancy role.
    pub role: Option<Role>,

    /// Whether the sibling can talk to this controller.
    pub comms_ok: Option<bool>,
}

/// A point-in-time copy of what is known about the sibling.
///
/// Attributes are dropped at construction unless the interface is present and
/// the heartbeat is active, so a snapshot of a sibling that is not live cannot
/// carry attribute values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SiblingSnapshot {
    interface_present: bool,
    heartbeat: bool,
    attributes: SiblingAttributes,
}

impl SiblingSnapshot {
    /// Creates a snapshot, discarding `attributes` if the sibling is not live.
    #[must_use]
    pub fn new(interface_present: bool, heartbeat: bool, attributes: SiblingAttributes) -> Self {
        let attributes = if interface_present && heartbeat {
            attributes
        } else {
            SiblingAttributes::default()
        };

        Self {
            interface_present,
            heartbeat,
            attributes,
        }
    }

    /// Whether the sibling interface is on the bus.
    #[must_use]
    pub const fn interface_present(&self) -> bool {
        self.interface_present
    }

    /// Whether the sibling heartbeat is active.
    #[must_use]
    pub const fn has_heartbeat(&self) -> bool {
        self.heartbeat
    }

    /// Whether the sibling is present with an active heartbeat.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.interface_present && self.heartbeat
    }

    /// The sibling's position.
    #[must_use]
    pub const fn position(&self) -> Option<usize> {
        self.attributes.position
    }

    /// The sibling's firmware version.
    #[must_use]
    pub fn fw_version(&self) -> Option<&str> {
        self.attributes.fw_version.as_deref()
    }

    /// The sibling's provisioning status.
    #[must_use]
    pub const fn provisioned(&self) -> Option<bool> {
        self.attributes.provisioned
    }

    /// Whether the sibling has redundancy enabled.
    #[must_use]
    pub const fn redundancy_enabled(&self) -> Option<bool> {
        self.attributes.redundancy_enabled
    }

    /// Whether the sibling has failovers paused.
    #[must_use]
    pub const fn failovers_paused(&self) -> Option<bool> {
        self.attributes.failovers_paused
    }

    /// The sibling's BMC state.
    #[must_use]
    pub const fn bmc_state(&self) -> Option<BmcState> {
        self.attributes.bmc_state
    }

    /// The sibling's role.
    #[must_use]
    pub const fn role(&self) -> Option<Role> {
        self.attributes.role
    }

    /// Whether the sibling can talk to this controller.
    #[must_use]
    pub const fn comms_ok(&self) -> Option<bool> {
        self.attributes.comms_ok
    }
}

/// Provides information about the sibling controller.
///
/// The getters have default implementations on top of [`Sibling::snapshot`],
/// and report "unavailable" if the snapshot cannot be taken.
#[async_trait]
pub trait Sibling
where
    Self: Send + Sync + 'static,
{
    /// Starts watching the bus for the sibling. A second call is a no-op.
    ///
    /// Never waits for the sibling to appear.
    async fn init(&self);

    /// Waits up to `timeout` for the sibling interface to be on the bus with
    /// an active heartbeat. Expiry is a normal outcome.
    async fn wait_for_sibling_up(&self, timeout: Duration);

    /// Takes a consistent copy of the sibling state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read consistently.
    fn snapshot(&self) -> Result<SiblingSnapshot>;

    /// Whether the sibling's slot is physically populated, regardless of
    /// whether its software is reachable.
    fn is_bmc_present(&self) -> bool;

    /// Whether the sibling interface is on the bus.
    fn interface_present(&self) -> bool {
        self.snapshot().is_ok_and(|snapshot| snapshot.interface_present())
    }

    /// Whether the sibling heartbeat is active.
    fn has_heartbeat(&self) -> bool {
        self.snapshot().is_ok_and(|snapshot| snapshot.has_heartbeat())
    }

    /// The sibling's position, if available.
    fn position(&self) -> Option<usize> {
        self.snapshot().ok().and_then(|snapshot| snapshot.position())
    }

    /// The sibling's role, if available.
    fn role(&self) -> Option<Role> {
        self.snapshot().ok().and_then(|snapshot| snapshot.role())
    }

    /// The sibling's provisioning status, if available.
    fn provisioned(&self) -> Option<bool> {
        self.snapshot().ok().and_then(|snapshot| snapshot.provisioned())
    }

    /// Whether the sibling has redundancy enabled, if available.
    fn redundancy_enabled(&self) -> Option<bool> {
        self.snapshot()
            .ok()
            .and_then(|snapshot| snapshot.redundancy_enabled())
    }

    /// Whether the sibling has failovers paused, if available.
    fn failovers_paused(&self) -> Option<bool> {
        self.snapshot()
            .ok()
            .and_then(|snapshot| snapshot.failovers_paused())
    }

    /// The sibling's firmware version, if available.
    fn fw_version(&self) -> Option<String> {
        self.snapshot()
            .ok()
            .and_then(|snapshot| snapshot.fw_version().map(str::to_string))
    }

    /// Whether the sibling can talk to this controller, if available.
    fn comms_ok(&self) -> Option<bool> {
        self.snapshot().ok().and_then(|snapshot| snapshot.comms_ok())
    }

    /// The sibling's BMC state, if available.
    fn bmc_state(&self) -> Option<BmcState> {
        self.snapshot().ok().and_then(|snapshot| snapshot.bmc_state())
    }
}
