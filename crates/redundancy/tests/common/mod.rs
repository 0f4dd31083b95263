//! Two-controller harness: one in-memory bus per controller, joined by a pair
//! of sibling relays.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rbmc_bus_memory::MemoryBus;
use rbmc_redundancy::{
    BusSibling, Manager, ManagerConfig, RelayConfig, SiblingConfig, SiblingRelay, Supervisor,
};
use rbmc_services_memory::MemoryServices;

/// How long managers in tests wait for their sibling.
pub const SIBLING_WAIT: Duration = Duration::from_secs(60);

pub type TestManager = Manager<MemoryBus, MemoryServices, BusSibling<MemoryBus>>;

/// One simulated controller.
pub struct Controller {
    /// The controller's bus. Other connections are opened from it.
    pub bus: MemoryBus,

    /// The connection the manager publishes on.
    pub manager_bus: MemoryBus,

    pub services: MemoryServices,
    pub sibling: Arc<BusSibling<MemoryBus>>,
    pub manager: TestManager,

    /// Scope of the manager and its sibling tracker.
    pub supervisor: Supervisor,

    /// Scope of the relay feeding this controller's Sibling interface.
    pub relay_supervisor: Supervisor,
}

impl Controller {
    pub async fn new(position: usize, hardware_present: bool) -> Self {
        let bus = MemoryBus::new();
        let manager_bus = bus.connect().await;
        let services = MemoryServices::with_position(position);
        let supervisor = Supervisor::new();

        let config = ManagerConfig {
            sibling_wait_timeout: SIBLING_WAIT,
            sibling: SiblingConfig {
                assume_hardware_present: hardware_present,
                ..SiblingConfig::default()
            },
            ..ManagerConfig::default()
        };

        let sibling = Arc::new(BusSibling::new(
            manager_bus.clone(),
            config.sibling.clone(),
            supervisor.clone(),
        ));

        let manager = Manager::new(
            manager_bus.clone(),
            Arc::new(services.clone()),
            sibling.clone(),
            config,
            supervisor.clone(),
        );

        Self {
            bus,
            manager_bus,
            services,
            sibling,
            manager,
            supervisor,
            relay_supervisor: Supervisor::new(),
        }
    }

    /// Starts mirroring `peer`'s redundancy state onto this controller's bus.
    pub async fn relay_from(&self, peer: &Self) {
        let relay = SiblingRelay::new(
            peer.bus.connect().await,
            self.bus.connect().await,
            RelayConfig::default(),
            self.relay_supervisor.clone(),
        );

        relay.start().await.unwrap();
    }

    /// Simulates the manager process exiting.
    pub async fn kill_manager(&self) {
        self.supervisor.shutdown().await;
        self.manager_bus.close().await;
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
        self.relay_supervisor.shutdown().await;
    }
}

/// Two controllers with relays running in both directions.
pub async fn pair(first_position: usize, second_position: usize) -> (Controller, Controller) {
    let first = Controller::new(first_position, true).await;
    let second = Controller::new(second_position, true).await;

    first.relay_from(&second).await;
    second.relay_from(&first).await;

    (first, second)
}
