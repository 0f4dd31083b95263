/// Interface this controller publishes its own redundancy state on.
pub const REDUNDANCY_INTERFACE: &str = "xyz.openbmc_project.State.BMC.Redundancy";

/// Well-known bus name claimed by the redundancy manager.
pub const REDUNDANCY_SERVICE: &str = REDUNDANCY_INTERFACE;

/// Object path of this controller's redundancy object.
pub const REDUNDANCY_OBJECT_PATH: &str = "/xyz/openbmc_project/state/bmc0";

/// Interface mirroring the sibling controller's redundancy state locally.
pub const SIBLING_INTERFACE: &str = "xyz.openbmc_project.State.BMC.Redundancy.Sibling";

/// Well-known bus name claimed by whatever mirrors the sibling's state.
pub const SIBLING_SERVICE: &str = SIBLING_INTERFACE;

/// Object path the sibling's mirrored state is published at.
pub const SIBLING_OBJECT_PATH: &str = "/xyz/openbmc_project/state/bmc/redundancy/sibling/bmc";

/// Signal member emitted once per heartbeat period.
pub const HEARTBEAT_SIGNAL: &str = "Heartbeat";

/// Property names shared by the redundancy and sibling interfaces.
pub mod property {
    /// Controller slot position.
    pub const BMC_POSITION: &str = "BMCPosition";

    /// Firmware version identifier.
    pub const FW_VERSION: &str = "FWVersion";

    /// Whether the controller is provisioned.
    pub const PROVISIONED: &str = "Provisioned";

    /// Whether redundancy is enabled.
    pub const REDUNDANCY_ENABLED: &str = "RedundancyEnabled";

    /// Whether failovers are paused.
    pub const FAILOVERS_PAUSED: &str = "FailoversPaused";

    /// Overall BMC state.
    pub const BMC_STATE: &str = "BMCState";

    /// Redundancy role.
    pub const ROLE: &str = "Role";

    /// Whether the sibling can communicate with this controller.
    pub const COMMUNICATION_OK: &str = "CommunicationOK";

    /// Whether the sibling's heartbeat is fresh.
    pub const HEARTBEAT: &str = "Heartbeat";
}
