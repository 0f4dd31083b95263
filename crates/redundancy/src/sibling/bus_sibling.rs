use super::state::{SiblingState, SiblingUpdate};
use super::{Sibling, SiblingSnapshot};
use crate::retry::RetryPolicy;
use crate::supervisor::Supervisor;
use crate::{Error, Result};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rbmc_bus::names::{SIBLING_INTERFACE, SIBLING_OBJECT_PATH};
use rbmc_bus::{Bus, MatchRule, PropertyMap, Signal, SignalStream};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for [`BusSibling`].
#[derive(Clone, Debug)]
pub struct SiblingConfig {
    /// How often `wait_for_sibling_up` re-checks the cached state.
    pub poll_interval: Duration,

    /// How hard to try resolving the sibling's service name after its
    /// interface first shows up.
    pub directory_retry: RetryPolicy,

    /// What `is_bmc_present` reports until a real slot-presence signal exists.
    pub assume_hardware_present: bool,
}

impl Default for SiblingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            directory_retry: RetryPolicy::default(),
            assume_hardware_present: true,
        }
    }
}

/// Tracks the sibling through the Sibling interface on the local bus.
///
/// Four watch loops keep the cache current: interface added, interface
/// removed, properties changed, and (once the sibling's service name is
/// known) loss of that name.
pub struct BusSibling<B>
where
    B: Bus,
{
    inner: Arc<Inner<B>>,
}

struct Inner<B>
where
    B: Bus,
{
    bus: B,
    config: SiblingConfig,
    initialized: AtomicBool,
    /// The service name and the token of the name watch started for it.
    service: Mutex<Option<(String, CancellationToken)>>,
    state: RwLock<SiblingState>,
    supervisor: Supervisor,
}

impl<B> BusSibling<B>
where
    B: Bus,
{
    /// Creates a sibling tracker. Nothing is watched until [`Sibling::init`].
    pub fn new(bus: B, config: SiblingConfig, supervisor: Supervisor) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                config,
                initialized: AtomicBool::new(false),
                service: Mutex::new(None),
                state: RwLock::new(SiblingState::default()),
                supervisor,
            }),
        }
    }
}

impl<B> Inner<B>
where
    B: Bus,
{
    fn update_state(&self, what: &str, f: impl FnOnce(&mut SiblingState)) {
        match self.state.write() {
            Ok(mut state) => f(&mut state),
            Err(_) => error!("sibling state poisoned, dropping {}", what),
        }
    }

    fn read_state<T>(&self, f: impl FnOnce(&SiblingState) -> T) -> Result<T> {
        self.state
            .read()
            .map(|state| f(&state))
            .map_err(|_| Error::SiblingStatePoisoned)
    }

    fn known_service(&self) -> Option<String> {
        self.service
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(name, _)| name.clone())
    }

    /// Asks the bus directory which service publishes the sibling interface.
    async fn get_service_name(&self) -> Option<String> {
        match self
            .bus
            .get_object(SIBLING_OBJECT_PATH, &[SIBLING_INTERFACE])
            .await
        {
            Ok(service) => service,
            Err(e) => {
                debug!("sibling service lookup failed: {}", e);
                None
            }
        }
    }

    /// Starts (or restarts, for a new service name) the name-loss watch.
    fn watch_service(self: &Arc<Self>, service_name: String) {
        let token = self.supervisor.shutdown_token().child_token();
        let stream = self
            .bus
            .subscribe(MatchRule::NameOwnerChanged(service_name.clone()));

        let previous = self
            .service
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((service_name, token.clone()));

        if let Some((_, previous_token)) = previous {
            previous_token.cancel();
        }

        self.supervisor.spawn(
            "sibling-name-owner-changed",
            self.clone().watch_name_owner_changed(stream, token),
        );
    }

    async fn load_properties(&self, service_name: &str) -> Result<SiblingUpdate> {
        let properties = self
            .bus
            .get_all_properties(service_name, SIBLING_OBJECT_PATH, SIBLING_INTERFACE)
            .await
            .map_err(|e| Error::Bus("reading sibling properties", e.to_string()))?;

        SiblingUpdate::parse(&properties)
    }

    async fn watch_interfaces_added(self: Arc<Self>, mut stream: B::Stream) {
        let shutdown_token = self.supervisor.shutdown_token().clone();

        loop {
            let signal = tokio::select! {
                biased;
                () = shutdown_token.cancelled() => break,
                signal = stream.next() => signal,
            };

            match signal {
                Some(Signal::InterfacesAdded { interfaces, .. }) => {
                    if let Some(properties) = interfaces.get(SIBLING_INTERFACE) {
                        self.on_interface_added(properties, &shutdown_token).await;
                    }
                }
                Some(_) => {}
                None => break,
            }
        }
    }

    async fn on_interface_added(
        self: &Arc<Self>,
        properties: &PropertyMap,
        cancel: &CancellationToken,
    ) {
        info!("sibling bus interface added");

        let update = match SiblingUpdate::parse(properties) {
            Ok(update) => update,
            Err(e) => {
                warn!("ignoring sibling interface with bad properties: {}", e);
                return;
            }
        };

        self.update_state("interface added", |state| {
            state.apply(update);
            state.interface_present = true;
        });

        match self.known_service() {
            None => {
                // First sighting: wait for the directory to catch up before
                // watching for the sibling's process going away.
                let service_name = self
                    .config
                    .directory_retry
                    .retry(cancel, |attempt| async move {
                        let service_name = self.get_service_name().await;
                        debug!(
                            "after interfaces added, sibling service is {:?} (attempt {})",
                            service_name, attempt
                        );
                        service_name
                    })
                    .await;

                match service_name {
                    Some(service_name) => {
                        info!("sibling service is {}", service_name);
                        self.watch_service(service_name);
                    }
                    None => warn!(
                        "sibling service name not found within {:?}",
                        self.config.directory_retry.budget()
                    ),
                }
            }
            Some(known) => match self.get_service_name().await {
                Some(service_name) if service_name != known => {
                    info!("sibling service moved from {} to {}", known, service_name);
                    self.watch_service(service_name);
                }
                _ => {}
            },
        }
    }

    async fn watch_interfaces_removed(self: Arc<Self>, mut stream: B::Stream) {
        let shutdown_token = self.supervisor.shutdown_token().clone();

        loop {
            let signal = tokio::select! {
                biased;
                () = shutdown_token.cancelled() => break,
                signal = stream.next() => signal,
            };

            match signal {
                Some(Signal::InterfacesRemoved { interfaces, .. })
                    if interfaces.iter().any(|interface| interface == SIBLING_INTERFACE) =>
                {
                    info!("sibling bus interface removed");
                    self.update_state("interface removed", SiblingState::clear_presence);
                }
                Some(_) => {}
                None => break,
            }
        }
    }

    async fn watch_properties_changed(self: Arc<Self>, mut stream: B::Stream) {
        let shutdown_token = self.supervisor.shutdown_token().clone();

        loop {
            let signal = tokio::select! {
                biased;
                () = shutdown_token.cancelled() => break,
                signal = stream.next() => signal,
            };

            match signal {
                Some(Signal::PropertiesChanged { changed, .. }) => {
                    for (name, value) in &changed {
                        info!("sibling property {} changed to {}", name, value);
                    }

                    match SiblingUpdate::parse(&changed) {
                        Ok(update) => self.update_state("property change", |state| {
                            state.apply(update);
                        }),
                        Err(e) => warn!("ignoring sibling property change: {}", e),
                    }
                }
                Some(_) => {}
                None => break,
            }
        }
    }

    async fn watch_name_owner_changed(
        self: Arc<Self>,
        mut stream: B::Stream,
        token: CancellationToken,
    ) {
        loop {
            let signal = tokio::select! {
                biased;
                () = token.cancelled() => break,
                signal = stream.next() => signal,
            };

            match signal {
                Some(signal) if signal.is_name_lost() => {
                    info!("sibling bus name lost");
                    self.update_state("name lost", SiblingState::clear_presence);
                }
                Some(_) => {}
                None => break,
            }
        }
    }
}

#[async_trait]
impl<B> Sibling for BusSibling<B>
where
    B: Bus,
{
    async fn init(&self) {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            info!("sibling init called more than once");
            return;
        }

        let inner = &self.inner;
        let supervisor = &inner.supervisor;

        // Subscribe before looking anything up so no change can slip between
        // the initial read and the watches.
        let added = inner.bus.subscribe(MatchRule::InterfacesAddedAtPath(
            SIBLING_OBJECT_PATH.to_string(),
        ));
        let removed = inner.bus.subscribe(MatchRule::InterfacesRemovedAtPath(
            SIBLING_OBJECT_PATH.to_string(),
        ));
        let changed = inner.bus.subscribe(MatchRule::PropertiesChanged {
            path: SIBLING_OBJECT_PATH.to_string(),
            interface: SIBLING_INTERFACE.to_string(),
        });

        supervisor.spawn(
            "sibling-interfaces-added",
            inner.clone().watch_interfaces_added(added),
        );
        supervisor.spawn(
            "sibling-interfaces-removed",
            inner.clone().watch_interfaces_removed(removed),
        );
        supervisor.spawn(
            "sibling-properties-changed",
            inner.clone().watch_properties_changed(changed),
        );

        if let Some(service_name) = inner.get_service_name().await {
            inner.update_state("initial presence", |state| state.interface_present = true);
            inner.watch_service(service_name.clone());

            match inner.load_properties(&service_name).await {
                Ok(update) => inner.update_state("initial properties", |state| state.apply(update)),
                Err(e) => {
                    error!("failed reading sibling properties: {}", e);
                    inner.update_state("initial properties", |state| {
                        state.interface_present = false;
                    });
                }
            }
        } else {
            inner.update_state("initial presence", |state| state.interface_present = false);
        }

        info!(
            "in sibling init, interface present is {}",
            self.interface_present()
        );
    }

    async fn wait_for_sibling_up(&self, timeout: Duration) {
        let start = Instant::now();
        let shutdown_token = self.inner.supervisor.shutdown_token();
        let mut waiting = false;

        loop {
            let (present, heartbeat) = self
                .inner
                .read_state(|state| (state.interface_present, state.heartbeat))
                .unwrap_or((false, false));

            if (present && heartbeat) || start.elapsed() >= timeout {
                break;
            }

            if !waiting {
                info!(
                    "waiting for sibling interface and/or heartbeat: present = {}, heartbeat = {}",
                    present, heartbeat
                );
                waiting = true;
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            tokio::select! {
                biased;
                () = shutdown_token.cancelled() => break,
                () = tokio::time::sleep(self.inner.config.poll_interval.min(remaining)) => {}
            }
        }

        let (present, heartbeat) = self
            .inner
            .read_state(|state| (state.interface_present, state.heartbeat))
            .unwrap_or((false, false));

        info!(
            "done waiting for sibling, interface present = {}, heartbeat = {}",
            present, heartbeat
        );
    }

    fn snapshot(&self) -> Result<SiblingSnapshot> {
        self.inner.read_state(SiblingState::snapshot)
    }

    fn is_bmc_present(&self) -> bool {
        // TODO: read the sibling slot's presence (and power good) once the
        // hardware signal is exposed.
        self.inner.config.assume_hardware_present
    }
}
