//! Sequences startup and owns the published redundancy state.

use crate::role_determination::{self, ErrorCase, Input, RoleInfo};
use crate::role_handler::RoleHandler;
use crate::sibling::{BusSibling, Sibling, SiblingConfig};
use crate::supervisor::Supervisor;
use crate::{Error, Result, Role};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rbmc_bus::names::{
    HEARTBEAT_SIGNAL, REDUNDANCY_INTERFACE, REDUNDANCY_OBJECT_PATH, REDUNDANCY_SERVICE, property,
};
use rbmc_bus::{Bus, PropertyMap};
use rbmc_services::Services;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Where the manager is in its startup sequence.
///
/// States only ever move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ManagerState {
    /// Constructed, not yet started.
    Created,

    /// Starting sibling tracking.
    Initializing,

    /// Waiting for the sibling to come up.
    AwaitingSibling,

    /// Running role determination.
    DeterminingRole,

    /// Active was chosen and published.
    RoleActive,

    /// Passive was chosen and published.
    RolePassive,

    /// The role handler was started. Terminal.
    Running,
}

/// Manager configuration.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Period of the heartbeat signal.
    pub heartbeat_interval: Duration,

    /// How long to wait for the sibling to come up before determining the role.
    pub sibling_wait_timeout: Duration,

    /// Sibling tracker configuration.
    pub sibling: SiblingConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            sibling_wait_timeout: Duration::from_secs(6 * 60),
            sibling: SiblingConfig::default(),
        }
    }
}

/// Determines and publishes this controller's redundancy role.
///
/// On [`Manager::start`] the manager publishes the redundancy interface with
/// `Role` unknown, then in the background: starts sibling tracking and the
/// heartbeat, waits for the sibling if its hardware is present, determines the
/// role once, publishes it, and starts the matching [`RoleHandler`].
pub struct Manager<B, S, Si>
where
    B: Bus,
    S: Services,
    Si: Sibling,
{
    inner: Arc<Inner<B, S, Si>>,
}

struct Inner<B, S, Si>
where
    B: Bus,
    S: Services,
    Si: Sibling,
{
    bus: B,
    config: ManagerConfig,
    role_info: watch::Sender<Option<RoleInfo>>,
    services: Arc<S>,
    sibling: Option<Arc<Si>>,
    started: AtomicBool,
    state: watch::Sender<ManagerState>,
    supervisor: Supervisor,
}

impl<B, S, Si> Clone for Manager<B, S, Si>
where
    B: Bus,
    S: Services,
    Si: Sibling,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B, S> Manager<B, S, BusSibling<B>>
where
    B: Bus,
    S: Services,
{
    /// Creates a manager that tracks the sibling through `bus`.
    pub fn with_bus_sibling(
        bus: B,
        services: Arc<S>,
        config: ManagerConfig,
        supervisor: Supervisor,
    ) -> Self {
        let sibling = BusSibling::new(bus.clone(), config.sibling.clone(), supervisor.clone());

        Self::new(bus, services, Arc::new(sibling), config, supervisor)
    }

    /// Creates a manager for a chassis with no sibling slot at all.
    pub fn standalone(
        bus: B,
        services: Arc<S>,
        config: ManagerConfig,
        supervisor: Supervisor,
    ) -> Self {
        Self::build(bus, services, None, config, supervisor)
    }
}

impl<B, S, Si> Manager<B, S, Si>
where
    B: Bus,
    S: Services,
    Si: Sibling,
{
    /// Creates a manager using the given sibling tracker.
    pub fn new(
        bus: B,
        services: Arc<S>,
        sibling: Arc<Si>,
        config: ManagerConfig,
        supervisor: Supervisor,
    ) -> Self {
        Self::build(bus, services, Some(sibling), config, supervisor)
    }

    fn build(
        bus: B,
        services: Arc<S>,
        sibling: Option<Arc<Si>>,
        config: ManagerConfig,
        supervisor: Supervisor,
    ) -> Self {
        let (state, _) = watch::channel(ManagerState::Created);
        let (role_info, _) = watch::channel(None);

        Self {
            inner: Arc::new(Inner {
                bus,
                config,
                role_info,
                services,
                sibling,
                started: AtomicBool::new(false),
                state,
                supervisor,
            }),
        }
    }

    /// Publishes the redundancy interface and starts the startup sequence in
    /// the background.
    ///
    /// Failing to claim the redundancy service name is logged; the interface
    /// stays reachable under this connection's unique name.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager was already started, if this
    /// controller's position cannot be read, or if the interface cannot be
    /// published. A failed start can be retried.
    pub async fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        let bmc_position = match self.inner.publish_interface().await {
            Ok(bmc_position) => bmc_position,
            Err(e) => {
                self.inner.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        if let Err(e) = self.inner.bus.request_name(REDUNDANCY_SERVICE).await {
            warn!("failed claiming {}: {}", REDUNDANCY_SERVICE, e);
        }

        let inner = self.inner.clone();
        self.inner
            .supervisor
            .spawn("manager-startup", async move {
                inner.startup(bmc_position).await;
            });

        Ok(())
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> ManagerState {
        *self.inner.state.borrow()
    }

    /// Waits until the manager has reached `state` (or moved past it).
    pub async fn wait_for_state(&self, state: ManagerState) {
        let mut receiver = self.inner.state.subscribe();

        // Only fails if the sender is gone, which can't happen while `self`
        // holds it.
        let _ = receiver.wait_for(|current| *current >= state).await;
    }

    /// The role determination result, once determination has run.
    #[must_use]
    pub fn role_info(&self) -> Option<RoleInfo> {
        *self.inner.role_info.borrow()
    }

    /// The role determined for this controller, `Role::Unknown` until then.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role_info().map_or(Role::Unknown, |info| info.role)
    }

    /// Stops the heartbeat, the sibling watches and any running startup work.
    pub async fn shutdown(&self) {
        self.inner.supervisor.shutdown().await;
    }
}

impl<B, S, Si> Inner<B, S, Si>
where
    B: Bus,
    S: Services,
    Si: Sibling,
{
    /// Reads this controller's facts and publishes them with an unknown
    /// role. Returns the position.
    async fn publish_interface(&self) -> Result<usize> {
        let bmc_position = self
            .services
            .get_bmc_position()
            .await
            .map_err(|e| Error::Position(e.to_string()))?;
        info!("BMC position is {}", bmc_position);

        let fw_version = self.services.get_fw_version().await.unwrap_or_else(|e| {
            warn!("failed reading FW version: {}", e);
            String::new()
        });

        let provisioned = self.services.is_provisioned().await.unwrap_or_else(|e| {
            warn!("failed reading provisioning status: {}", e);
            true
        });

        let properties = PropertyMap::from([
            (property::ROLE.to_string(), Role::Unknown.as_bus_str().into()),
            (property::BMC_POSITION.to_string(), (bmc_position as u64).into()),
            (property::FW_VERSION.to_string(), fw_version.into()),
            (property::PROVISIONED.to_string(), provisioned.into()),
            (property::REDUNDANCY_ENABLED.to_string(), false.into()),
            (property::FAILOVERS_PAUSED.to_string(), false.into()),
        ]);

        self.bus
            .add_interface(REDUNDANCY_OBJECT_PATH, REDUNDANCY_INTERFACE, properties)
            .await
            .map_err(|e| Error::Bus("publishing redundancy interface", e.to_string()))?;

        Ok(bmc_position)
    }

    fn set_state(&self, state: ManagerState) {
        debug!("manager state {:?}", state);
        self.state.send_replace(state);
    }

    async fn startup(self: Arc<Self>, bmc_position: usize) {
        self.set_state(ManagerState::Initializing);

        if let Some(sibling) = &self.sibling {
            sibling.init().await;
        }

        // The sibling relies on our heartbeat whatever role we end up with.
        let heartbeat = self.clone();
        self.supervisor.spawn("heartbeat", async move {
            heartbeat.heartbeat_loop().await;
        });

        if let Some(sibling) = &self.sibling {
            if sibling.is_bmc_present() {
                self.set_state(ManagerState::AwaitingSibling);

                let wait = sibling.wait_for_sibling_up(self.config.sibling_wait_timeout);
                tokio::select! {
                    biased;
                    () = self.supervisor.shutdown_token().cancelled() => return,
                    () = wait => {}
                }
            } else {
                info!("sibling BMC hardware not present, not waiting for it");
            }
        }

        self.set_state(ManagerState::DeterminingRole);
        let (role_info, sibling_live) = self.determine_role(bmc_position);
        self.role_info.send_replace(Some(role_info));

        self.publish_role(role_info, sibling_live).await;

        let Some(handler) = RoleHandler::for_role(role_info.role) else {
            error!("no handler for role {}", role_info.role);
            return;
        };

        self.set_state(match handler {
            RoleHandler::Active => ManagerState::RoleActive,
            RoleHandler::Passive => ManagerState::RolePassive,
        });

        let services = self.services.clone();
        self.supervisor.spawn("role-handler", async move {
            handler.start(services.as_ref()).await;
        });

        self.set_state(ManagerState::Running);
    }

    /// Returns the role verdict and whether the sibling was live for it.
    fn determine_role(&self, bmc_position: usize) -> (RoleInfo, bool) {
        let Some(sibling) = &self.sibling else {
            return (role_determination::run_without_sibling(bmc_position), false);
        };

        let snapshot = match sibling.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("internal error determining role: {}", e);
                return (RoleInfo::internal_error(), false);
            }
        };

        if snapshot.is_live()
            && (snapshot.position().is_none()
                || snapshot.role().is_none()
                || snapshot.provisioned().is_none())
        {
            warn!(
                "sibling heartbeat is active but some properties are not yet known: position = {:?}, role = {:?}, provisioned = {:?}",
                snapshot.position(),
                snapshot.role(),
                snapshot.provisioned()
            );
        }

        let input = Input {
            bmc_position,
            sibling_position: snapshot.position(),
            sibling_role: snapshot.role().unwrap_or_default(),
            sibling_heartbeat: snapshot.is_live(),
            sibling_provisioned: snapshot.provisioned().unwrap_or(true),
        };

        debug!("role determination input: {:?}", input);

        (role_determination::run(&input), snapshot.is_live())
    }

    async fn publish_role(&self, role_info: RoleInfo, sibling_live: bool) {
        info!("publishing role {}", role_info.role);

        if let Err(e) = self
            .bus
            .set_property(
                REDUNDANCY_OBJECT_PATH,
                REDUNDANCY_INTERFACE,
                property::ROLE,
                role_info.role.as_bus_str().into(),
            )
            .await
        {
            error!("failed publishing role: {}", e);
        }

        let redundancy_enabled = sibling_live && role_info.error == ErrorCase::NoError;
        if let Err(e) = self
            .bus
            .set_property(
                REDUNDANCY_OBJECT_PATH,
                REDUNDANCY_INTERFACE,
                property::REDUNDANCY_ENABLED,
                redundancy_enabled.into(),
            )
            .await
        {
            error!("failed publishing redundancy enabled: {}", e);
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let shutdown_token = self.supervisor.shutdown_token().clone();
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = shutdown_token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self
                        .bus
                        .emit(REDUNDANCY_OBJECT_PATH, REDUNDANCY_INTERFACE, HEARTBEAT_SIGNAL)
                        .await
                    {
                        warn!("failed emitting heartbeat: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::sibling::{SiblingAttributes, SiblingSnapshot};

    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use rbmc_bus::{MatchRule, PropertyValue, Signal, SignalStream};
    use rbmc_bus_memory::MemoryBus;
    use rbmc_services_memory::{MemoryServices, MemoryServicesOptions};
    use tokio::time::Instant;

    /// A sibling whose state is set directly by the test.
    #[derive(Default)]
    struct FixedSibling {
        hardware_absent: bool,
        snapshot: Mutex<Option<SiblingSnapshot>>,
    }

    impl FixedSibling {
        fn live(position: usize, role: Role) -> Self {
            Self {
                hardware_absent: false,
                snapshot: Mutex::new(Some(SiblingSnapshot::new(
                    true,
                    true,
                    SiblingAttributes {
                        position: Some(position),
                        role: Some(role),
                        provisioned: Some(true),
                        ..SiblingAttributes::default()
                    },
                ))),
            }
        }
    }

    #[async_trait]
    impl Sibling for FixedSibling {
        async fn init(&self) {}

        async fn wait_for_sibling_up(&self, timeout: Duration) {
            if !self.snapshot().is_ok_and(|snapshot| snapshot.is_live()) {
                tokio::time::sleep(timeout).await;
            }
        }

        fn snapshot(&self) -> Result<SiblingSnapshot> {
            self.snapshot
                .lock()
                .unwrap()
                .clone()
                .ok_or(Error::SiblingStatePoisoned)
        }

        fn is_bmc_present(&self) -> bool {
            !self.hardware_absent
        }
    }

    fn config() -> ManagerConfig {
        ManagerConfig {
            sibling_wait_timeout: Duration::from_secs(60),
            ..ManagerConfig::default()
        }
    }

    fn manager(
        bus: &MemoryBus,
        services: MemoryServices,
        sibling: FixedSibling,
    ) -> Manager<MemoryBus, MemoryServices, FixedSibling> {
        Manager::new(
            bus.clone(),
            Arc::new(services),
            Arc::new(sibling),
            config(),
            Supervisor::new(),
        )
    }

    async fn published(bus: &MemoryBus) -> PropertyMap {
        bus.get_all_properties(REDUNDANCY_SERVICE, REDUNDANCY_OBJECT_PATH, REDUNDANCY_INTERFACE)
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_interface_before_role_is_known() {
        let bus = MemoryBus::new();
        let manager = manager(&bus, MemoryServices::with_position(1), FixedSibling::default());

        manager.start().await.unwrap();
        let properties = published(&bus).await;

        assert_eq!(properties[property::ROLE], PropertyValue::from(Role::Unknown.as_bus_str()));
        assert_eq!(properties[property::BMC_POSITION], PropertyValue::from(1_u64));
        assert_eq!(properties[property::FW_VERSION], PropertyValue::from("simulated"));
        assert_eq!(properties[property::PROVISIONED], PropertyValue::from(true));
        assert_eq!(properties[property::FAILOVERS_PAUSED], PropertyValue::from(false));
        assert_eq!(manager.role(), Role::Unknown);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_sibling_decides_without_waiting() {
        let bus = MemoryBus::new();
        let services = MemoryServices::with_position(1);
        let manager = manager(&bus, services.clone(), FixedSibling::live(0, Role::Active));
        let start = Instant::now();

        manager.start().await.unwrap();
        manager.wait_for_state(ManagerState::Running).await;

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(
            manager.role_info(),
            Some(RoleInfo {
                role: Role::Passive,
                error: ErrorCase::NoError
            })
        );

        let properties = published(&bus).await;
        assert_eq!(properties[property::ROLE], PropertyValue::from(Role::Passive.as_bus_str()));
        assert_eq!(properties[property::REDUNDANCY_ENABLED], PropertyValue::from(true));

        manager.shutdown().await;
        assert_eq!(
            services.started_units().await,
            vec![crate::role_handler::PASSIVE_TARGET.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_sibling_waits_for_timeout_then_goes_active() {
        let bus = MemoryBus::new();
        let sibling = FixedSibling {
            snapshot: Mutex::new(Some(SiblingSnapshot::default())),
            ..FixedSibling::default()
        };
        let manager = manager(&bus, MemoryServices::with_position(1), sibling);
        let start = Instant::now();

        manager.start().await.unwrap();
        manager.wait_for_state(ManagerState::AwaitingSibling).await;
        assert_eq!(manager.role(), Role::Unknown);

        manager.wait_for_state(ManagerState::Running).await;

        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(manager.role(), Role::Active);
        assert_eq!(
            published(&bus).await[property::REDUNDANCY_ENABLED],
            PropertyValue::from(false)
        );

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_hardware_skips_waiting() {
        let bus = MemoryBus::new();
        let sibling = FixedSibling {
            hardware_absent: true,
            snapshot: Mutex::new(Some(SiblingSnapshot::default())),
        };
        let manager = manager(&bus, MemoryServices::with_position(1), sibling);
        let start = Instant::now();

        manager.start().await.unwrap();
        manager.wait_for_state(ManagerState::Running).await;

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(manager.role(), Role::Active);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_sibling_state_is_an_internal_error() {
        let bus = MemoryBus::new();
        let sibling = FixedSibling {
            hardware_absent: true,
            snapshot: Mutex::new(None),
        };
        let manager = manager(&bus, MemoryServices::with_position(0), sibling);

        manager.start().await.unwrap();
        manager.wait_for_state(ManagerState::Running).await;

        assert_eq!(manager.role_info(), Some(RoleInfo::internal_error()));
        assert_eq!(manager.state(), ManagerState::Running);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_positions_disables_redundancy() {
        let bus = MemoryBus::new();
        let manager = manager(
            &bus,
            MemoryServices::with_position(0),
            FixedSibling::live(0, Role::Unknown),
        );

        manager.start().await.unwrap();
        manager.wait_for_state(ManagerState::Running).await;

        assert_eq!(
            manager.role_info(),
            Some(RoleInfo {
                role: Role::Passive,
                error: ErrorCase::SamePositions
            })
        );
        assert_eq!(
            published(&bus).await[property::REDUNDANCY_ENABLED],
            PropertyValue::from(false)
        );

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_failure_is_fatal() {
        let bus = MemoryBus::new();
        let services = MemoryServices::new(MemoryServicesOptions {
            position: None,
            ..MemoryServicesOptions::default()
        });
        let manager = manager(&bus, services, FixedSibling::default());

        assert_matches!(manager.start().await, Err(Error::Position(_)));
        assert_eq!(manager.state(), ManagerState::Created);
        assert!(
            bus.get_object(REDUNDANCY_OBJECT_PATH, &[REDUNDANCY_INTERFACE])
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected() {
        let bus = MemoryBus::new();
        let manager = manager(&bus, MemoryServices::with_position(0), FixedSibling::default());

        manager.start().await.unwrap();

        assert_matches!(manager.start().await, Err(Error::AlreadyStarted));

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_can_be_retried() {
        let bus = MemoryBus::new();
        let services = MemoryServices::new(MemoryServicesOptions {
            position: None,
            ..MemoryServicesOptions::default()
        });
        let manager = manager(&bus, services, FixedSibling::default());

        assert_matches!(manager.start().await, Err(Error::Position(_)));
        assert_matches!(manager.start().await, Err(Error::Position(_)));
        assert_eq!(manager.state(), ManagerState::Created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_taken_service_name_does_not_stop_startup() {
        let bus = MemoryBus::new();
        let squatter = bus.connect().await;
        squatter.request_name(REDUNDANCY_SERVICE).await.unwrap();

        let sibling = FixedSibling {
            hardware_absent: true,
            snapshot: Mutex::new(Some(SiblingSnapshot::default())),
        };
        let manager = manager(&bus, MemoryServices::with_position(0), sibling);

        manager.start().await.unwrap();
        manager.wait_for_state(ManagerState::Running).await;

        assert_eq!(manager.role(), Role::Active);
        assert_matches!(manager.start().await, Err(Error::AlreadyStarted));

        let properties = bus
            .get_all_properties(bus.unique_name(), REDUNDANCY_OBJECT_PATH, REDUNDANCY_INTERFACE)
            .await
            .unwrap();
        assert_eq!(properties[property::ROLE], PropertyValue::from(Role::Active.as_bus_str()));

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_standalone_uses_position_only() {
        let bus = MemoryBus::new();
        let manager: Manager<MemoryBus, MemoryServices, BusSibling<MemoryBus>> =
            Manager::standalone(
                bus.clone(),
                Arc::new(MemoryServices::with_position(1)),
                config(),
                Supervisor::new(),
            );

        manager.start().await.unwrap();
        manager.wait_for_state(ManagerState::Running).await;

        assert_eq!(manager.role(), Role::Passive);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_runs_every_interval() {
        let bus = MemoryBus::new();
        let listener = bus.connect().await;
        let mut heartbeats = listener.subscribe(MatchRule::Emitted {
            path: REDUNDANCY_OBJECT_PATH.to_string(),
            interface: REDUNDANCY_INTERFACE.to_string(),
            member: HEARTBEAT_SIGNAL.to_string(),
        });
        let manager = manager(&bus, MemoryServices::with_position(0), FixedSibling::default());

        manager.start().await.unwrap();

        let start = Instant::now();
        for _ in 0..3 {
            assert_matches!(heartbeats.next().await, Some(Signal::Emitted { .. }));
        }
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));

        manager.shutdown().await;
    }
}
