//! Mirrors the peer controller's redundancy interface onto the local bus.
//!
//! On hardware this is the job of a separate cross-controller daemon. The relay
//! provides the same contract between two buses: the peer's published
//! properties show up locally on the Sibling interface, together with
//! `CommunicationOK` and a `Heartbeat` flag that tracks whether the peer's
//! heartbeat signal is still arriving.

use crate::supervisor::Supervisor;
use crate::{Error, Result};

use std::time::Duration;

use rbmc_bus::names::{
    HEARTBEAT_SIGNAL, REDUNDANCY_INTERFACE, REDUNDANCY_OBJECT_PATH, REDUNDANCY_SERVICE,
    SIBLING_INTERFACE, SIBLING_OBJECT_PATH, SIBLING_SERVICE, property,
};
use rbmc_bus::{Bus, MatchRule, PropertyMap, PropertyValue, Signal, SignalStream};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Peer properties copied onto the Sibling interface.
const FORWARDED: [&str; 7] = [
    property::ROLE,
    property::BMC_POSITION,
    property::FW_VERSION,
    property::PROVISIONED,
    property::REDUNDANCY_ENABLED,
    property::FAILOVERS_PAUSED,
    property::BMC_STATE,
];

/// Configuration for [`SiblingRelay`].
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// How long after the last peer heartbeat `Heartbeat` drops to false.
    pub stale_after: Duration,

    /// How often heartbeat freshness is checked.
    pub check_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(3),
            check_interval: Duration::from_millis(500),
        }
    }
}

/// Publishes the peer's redundancy state as the local Sibling interface.
pub struct SiblingRelay<B>
where
    B: Bus,
{
    peer: B,
    local: B,
    config: RelayConfig,
    supervisor: Supervisor,
}

struct Streams<S> {
    added: S,
    removed: S,
    changed: S,
    heartbeat: S,
    name_owner: S,
}

struct RelayLoop<B>
where
    B: Bus,
{
    peer: B,
    local: B,
    config: RelayConfig,
    published: bool,
    last_heartbeat: Option<Instant>,
    heartbeat: bool,
}

impl<B> SiblingRelay<B>
where
    B: Bus,
{
    /// Creates a relay reading from `peer` and publishing on `local`.
    pub const fn new(peer: B, local: B, config: RelayConfig, supervisor: Supervisor) -> Self {
        Self {
            peer,
            local,
            config,
            supervisor,
        }
    }

    /// Claims the sibling service name locally and starts relaying.
    ///
    /// # Errors
    ///
    /// Returns an error if the sibling service name cannot be claimed.
    pub async fn start(&self) -> Result<()> {
        self.local
            .request_name(SIBLING_SERVICE)
            .await
            .map_err(|e| Error::Bus("claiming sibling service name", e.to_string()))?;

        let streams = Streams {
            added: self.peer.subscribe(MatchRule::InterfacesAddedAtPath(
                REDUNDANCY_OBJECT_PATH.to_string(),
            )),
            removed: self.peer.subscribe(MatchRule::InterfacesRemovedAtPath(
                REDUNDANCY_OBJECT_PATH.to_string(),
            )),
            changed: self.peer.subscribe(MatchRule::PropertiesChanged {
                path: REDUNDANCY_OBJECT_PATH.to_string(),
                interface: REDUNDANCY_INTERFACE.to_string(),
            }),
            heartbeat: self.peer.subscribe(MatchRule::Emitted {
                path: REDUNDANCY_OBJECT_PATH.to_string(),
                interface: REDUNDANCY_INTERFACE.to_string(),
                member: HEARTBEAT_SIGNAL.to_string(),
            }),
            name_owner: self
                .peer
                .subscribe(MatchRule::NameOwnerChanged(REDUNDANCY_SERVICE.to_string())),
        };

        let relay = RelayLoop {
            peer: self.peer.clone(),
            local: self.local.clone(),
            config: self.config.clone(),
            published: false,
            last_heartbeat: None,
            heartbeat: false,
        };

        let shutdown_token = self.supervisor.shutdown_token().clone();
        self.supervisor.spawn("sibling-relay", async move {
            relay.run(streams, shutdown_token).await;
        });

        Ok(())
    }
}

impl<B> RelayLoop<B>
where
    B: Bus,
{
    async fn run(
        mut self,
        mut streams: Streams<B::Stream>,
        shutdown_token: CancellationToken,
    ) {
        self.fetch_and_publish().await;

        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let signal = tokio::select! {
                biased;
                () = shutdown_token.cancelled() => break,
                _ = ticker.tick() => {
                    self.check_freshness().await;
                    continue;
                }
                signal = streams.heartbeat.next() => signal,
                signal = streams.added.next() => signal,
                signal = streams.removed.next() => signal,
                signal = streams.changed.next() => signal,
                signal = streams.name_owner.next() => signal,
            };

            let Some(signal) = signal else {
                debug!("peer bus closed, relay exiting");
                break;
            };

            self.handle(signal).await;
        }

        self.withdraw().await;
    }

    async fn handle(&mut self, signal: Signal) {
        match &signal {
            Signal::Emitted { .. } => {
                self.last_heartbeat = Some(Instant::now());

                if !self.published {
                    self.fetch_and_publish().await;
                } else if !self.heartbeat {
                    self.set_heartbeat(true).await;
                }
            }
            Signal::InterfacesAdded { interfaces, .. } => {
                if let Some(properties) = interfaces.get(REDUNDANCY_INTERFACE) {
                    info!("peer redundancy interface added");
                    self.publish(properties).await;
                }
            }
            Signal::InterfacesRemoved { interfaces, .. } => {
                if interfaces.iter().any(|i| i == REDUNDANCY_INTERFACE) {
                    info!("peer redundancy interface removed");
                    self.withdraw().await;
                }
            }
            Signal::PropertiesChanged { changed, .. } => {
                if self.published {
                    for (name, value) in forwarded(changed) {
                        self.set(&name, value).await;
                    }
                }
            }
            Signal::NameOwnerChanged { .. } => {
                if signal.is_name_lost() {
                    info!("peer redundancy service lost its name");
                    self.withdraw().await;
                }
            }
        }
    }

    fn heartbeat_is_fresh(&self) -> bool {
        self.last_heartbeat
            .is_some_and(|last| last.elapsed() < self.config.stale_after)
    }

    async fn check_freshness(&mut self) {
        if self.published && self.heartbeat && !self.heartbeat_is_fresh() {
            info!(
                "no peer heartbeat within {:?}, marking sibling heartbeat stale",
                self.config.stale_after
            );
            self.set_heartbeat(false).await;
        }
    }

    async fn fetch_and_publish(&mut self) {
        let service = match self
            .peer
            .get_object(REDUNDANCY_OBJECT_PATH, &[REDUNDANCY_INTERFACE])
            .await
        {
            Ok(Some(service)) => service,
            Ok(None) => {
                debug!("peer redundancy interface not on the bus yet");
                return;
            }
            Err(e) => {
                warn!("failed looking up peer redundancy service: {}", e);
                return;
            }
        };

        match self
            .peer
            .get_all_properties(&service, REDUNDANCY_OBJECT_PATH, REDUNDANCY_INTERFACE)
            .await
        {
            Ok(properties) => self.publish(&properties).await,
            Err(e) => warn!("failed reading peer redundancy properties: {}", e),
        }
    }

    async fn publish(&mut self, peer_properties: &PropertyMap) {
        self.heartbeat = self.heartbeat_is_fresh();

        if self.published {
            for (name, value) in forwarded(peer_properties) {
                self.set(&name, value).await;
            }
            self.set(property::HEARTBEAT, self.heartbeat.into()).await;
            return;
        }

        let mut properties: PropertyMap = forwarded(peer_properties).collect();
        properties.insert(property::COMMUNICATION_OK.to_string(), true.into());
        properties.insert(property::HEARTBEAT.to_string(), self.heartbeat.into());

        match self
            .local
            .add_interface(SIBLING_OBJECT_PATH, SIBLING_INTERFACE, properties)
            .await
        {
            Ok(()) => {
                info!("publishing sibling interface, heartbeat = {}", self.heartbeat);
                self.published = true;
            }
            Err(e) => warn!("failed publishing sibling interface: {}", e),
        }
    }

    async fn withdraw(&mut self) {
        self.heartbeat = false;

        if !self.published {
            return;
        }
        self.published = false;

        if let Err(e) = self
            .local
            .remove_interface(SIBLING_OBJECT_PATH, SIBLING_INTERFACE)
            .await
        {
            warn!("failed withdrawing sibling interface: {}", e);
        } else {
            info!("sibling interface withdrawn");
        }
    }

    async fn set_heartbeat(&mut self, heartbeat: bool) {
        self.heartbeat = heartbeat;
        self.set(property::HEARTBEAT, heartbeat.into()).await;
    }

    async fn set(&self, name: &str, value: PropertyValue) {
        if let Err(e) = self
            .local
            .set_property(SIBLING_OBJECT_PATH, SIBLING_INTERFACE, name, value)
            .await
        {
            warn!("failed updating sibling property {}: {}", name, e);
        }
    }
}

fn forwarded(properties: &PropertyMap) -> impl Iterator<Item = (String, PropertyValue)> + '_ {
    properties
        .iter()
        .filter(|(name, _)| FORWARDED.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::Role;

    use rbmc_bus_memory::MemoryBus;

    struct Fixture {
        peer: MemoryBus,
        reader: MemoryBus,
        supervisor: Supervisor,
    }

    impl Fixture {
        async fn start() -> Self {
            let peer_bus = MemoryBus::new();
            let local_bus = MemoryBus::new();
            let supervisor = Supervisor::new();

            let relay = SiblingRelay::new(
                peer_bus.clone(),
                local_bus.clone(),
                RelayConfig::default(),
                supervisor.clone(),
            );
            relay.start().await.unwrap();

            Self {
                peer: peer_bus.connect().await,
                reader: local_bus.connect().await,
                supervisor,
            }
        }

        async fn publish_peer(&self) {
            self.peer.request_name(REDUNDANCY_SERVICE).await.unwrap();
            self.peer
                .add_interface(
                    REDUNDANCY_OBJECT_PATH,
                    REDUNDANCY_INTERFACE,
                    PropertyMap::from([
                        (property::ROLE.to_string(), Role::Unknown.as_bus_str().into()),
                        (property::BMC_POSITION.to_string(), PropertyValue::U64(1)),
                        (property::PROVISIONED.to_string(), true.into()),
                        ("Unrelated".to_string(), true.into()),
                    ]),
                )
                .await
                .unwrap();
        }

        async fn heartbeat(&self) {
            self.peer
                .emit(REDUNDANCY_OBJECT_PATH, REDUNDANCY_INTERFACE, HEARTBEAT_SIGNAL)
                .await
                .unwrap();
        }

        async fn sibling(&self) -> Option<PropertyMap> {
            self.reader
                .get_all_properties(SIBLING_SERVICE, SIBLING_OBJECT_PATH, SIBLING_INTERFACE)
                .await
                .ok()
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_relays_peer_properties_and_heartbeat() {
        let fixture = Fixture::start().await;
        assert_eq!(fixture.sibling().await, None);

        fixture.publish_peer().await;
        settle().await;

        let sibling = fixture.sibling().await.unwrap();
        assert_eq!(sibling[property::BMC_POSITION], PropertyValue::U64(1));
        assert_eq!(sibling[property::COMMUNICATION_OK], PropertyValue::Bool(true));
        assert_eq!(sibling[property::HEARTBEAT], PropertyValue::Bool(false));
        assert!(!sibling.contains_key("Unrelated"));

        fixture.heartbeat().await;
        settle().await;
        assert_eq!(
            fixture.sibling().await.unwrap()[property::HEARTBEAT],
            PropertyValue::Bool(true)
        );

        fixture
            .peer
            .set_property(
                REDUNDANCY_OBJECT_PATH,
                REDUNDANCY_INTERFACE,
                property::ROLE,
                Role::Passive.as_bus_str().into(),
            )
            .await
            .unwrap();
        settle().await;
        assert_eq!(
            fixture.sibling().await.unwrap()[property::ROLE],
            PropertyValue::from(Role::Passive.as_bus_str())
        );

        fixture.supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_goes_stale() {
        let fixture = Fixture::start().await;
        fixture.publish_peer().await;
        fixture.heartbeat().await;
        settle().await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            fixture.sibling().await.unwrap()[property::HEARTBEAT],
            PropertyValue::Bool(true)
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            fixture.sibling().await.unwrap()[property::HEARTBEAT],
            PropertyValue::Bool(false)
        );

        fixture.supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_exit_withdraws_sibling() {
        let fixture = Fixture::start().await;
        fixture.publish_peer().await;
        fixture.heartbeat().await;
        settle().await;
        assert!(fixture.sibling().await.is_some());

        fixture.peer.close().await;
        settle().await;

        assert_eq!(fixture.sibling().await, None);

        fixture.supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_only_a_lost_name_withdraws_sibling() {
        let peer = MemoryBus::new();
        let local = MemoryBus::new();
        peer.add_interface(
            REDUNDANCY_OBJECT_PATH,
            REDUNDANCY_INTERFACE,
            PropertyMap::from([(property::BMC_POSITION.to_string(), PropertyValue::U64(1))]),
        )
        .await
        .unwrap();

        let mut relay = RelayLoop {
            peer: peer.clone(),
            local: local.clone(),
            config: RelayConfig::default(),
            published: false,
            last_heartbeat: None,
            heartbeat: false,
        };
        relay.fetch_and_publish().await;
        assert!(relay.published);

        let name_cleared = |old_owner: &str| Signal::NameOwnerChanged {
            name: REDUNDANCY_SERVICE.to_string(),
            old_owner: old_owner.to_string(),
            new_owner: String::new(),
        };
        let sibling = || {
            local.get_all_properties(local.unique_name(), SIBLING_OBJECT_PATH, SIBLING_INTERFACE)
        };

        relay.handle(name_cleared("")).await;
        assert!(relay.published);
        assert!(sibling().await.is_ok());

        relay.handle(name_cleared(peer.unique_name())).await;
        assert!(!relay.published);
        assert!(sibling().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_withdraws_sibling() {
        let fixture = Fixture::start().await;
        fixture.publish_peer().await;
        settle().await;
        assert!(fixture.sibling().await.is_some());

        fixture.supervisor.shutdown().await;

        assert_eq!(fixture.sibling().await, None);
    }
}
