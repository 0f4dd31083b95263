//! In-memory (single process) implementation of the redundancy bus for tests
//! and local development.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use rbmc_bus::{Bus, InterfaceMap, MatchRule, PropertyMap, PropertyValue, Signal, SignalStream};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, warn};

/// Number of undelivered signals a slow subscriber may fall behind by.
const SIGNAL_CAPACITY: usize = 1024;

#[derive(Debug)]
struct PublishedInterface {
    owner: String,
    properties: PropertyMap,
}

#[derive(Debug, Default)]
struct BusState {
    next_connection: u64,
    /// Well-known name -> owning unique name.
    names: HashMap<String, String>,
    /// Path -> interface -> published interface.
    objects: BTreeMap<String, BTreeMap<String, PublishedInterface>>,
    closed: HashSet<String>,
}

impl BusState {
    fn allocate_unique_name(&mut self) -> String {
        self.next_connection += 1;
        format!(":1.{}", self.next_connection)
    }

    fn resolve(&self, service: &str) -> Option<String> {
        if service.starts_with(':') {
            return (!self.closed.contains(service)).then(|| service.to_string());
        }

        self.names.get(service).cloned()
    }

    fn well_known_name_of(&self, unique_name: &str) -> Option<String> {
        self.names
            .iter()
            .filter(|(_, owner)| owner.as_str() == unique_name)
            .map(|(name, _)| name.clone())
            .min()
    }

    fn owned_interface_mut(
        &mut self,
        owner: &str,
        path: &str,
        interface: &str,
    ) -> Result<&mut PublishedInterface, Error> {
        self.objects
            .get_mut(path)
            .and_then(|interfaces| interfaces.get_mut(interface))
            .filter(|published| published.owner == owner)
            .ok_or_else(|| Error::NoSuchInterface {
                path: path.to_string(),
                interface: interface.to_string(),
            })
    }
}

struct Shared {
    state: Mutex<BusState>,
    signals: broadcast::Sender<Signal>,
}

impl Shared {
    fn publish(&self, signal: Signal) {
        debug!("bus signal: {:?}", signal);

        // No receivers is fine: nobody is subscribed yet.
        let _ = self.signals.send(signal);
    }
}

/// A connection to an in-memory bus.
///
/// Clones share the same connection. Use [`MemoryBus::connect`] to open further
/// connections on the same bus, e.g. one per simulated daemon.
#[derive(Clone)]
pub struct MemoryBus {
    shared: Arc<Shared>,
    unique_name: String,
}

impl Debug for MemoryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBus")
            .field("unique_name", &self.unique_name)
            .finish_non_exhaustive()
    }
}

impl MemoryBus {
    /// Creates a new, empty bus and returns the first connection to it.
    #[must_use]
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        let mut state = BusState::default();
        let unique_name = state.allocate_unique_name();

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                signals,
            }),
            unique_name,
        }
    }

    /// Opens another connection on the same bus.
    pub async fn connect(&self) -> Self {
        let mut state = self.shared.state.lock().await;
        let unique_name = state.allocate_unique_name();

        self.shared.publish(Signal::NameOwnerChanged {
            name: unique_name.clone(),
            old_owner: String::new(),
            new_owner: unique_name.clone(),
        });

        Self {
            shared: self.shared.clone(),
            unique_name,
        }
    }

    /// Closes this connection, as if its process exited.
    ///
    /// Everything the connection published is withdrawn and every name it owned
    /// is released, with the corresponding signals.
    pub async fn close(&self) {
        let mut state = self.shared.state.lock().await;

        if !state.closed.insert(self.unique_name.clone()) {
            return;
        }

        let mut emptied = Vec::new();
        for (path, interfaces) in &mut state.objects {
            let removed: Vec<String> = interfaces
                .iter()
                .filter(|(_, published)| published.owner == self.unique_name)
                .map(|(interface, _)| interface.clone())
                .collect();

            if removed.is_empty() {
                continue;
            }

            for interface in &removed {
                interfaces.remove(interface);
            }

            if interfaces.is_empty() {
                emptied.push(path.clone());
            }

            self.shared.publish(Signal::InterfacesRemoved {
                path: path.clone(),
                interfaces: removed,
            });
        }

        for path in emptied {
            state.objects.remove(&path);
        }

        let mut released: Vec<String> = state
            .names
            .iter()
            .filter(|(_, owner)| **owner == self.unique_name)
            .map(|(name, _)| name.clone())
            .collect();
        released.sort();

        for name in released {
            state.names.remove(&name);
            self.shared.publish(Signal::NameOwnerChanged {
                name,
                old_owner: self.unique_name.clone(),
                new_owner: String::new(),
            });
        }

        self.shared.publish(Signal::NameOwnerChanged {
            name: self.unique_name.clone(),
            old_owner: self.unique_name.clone(),
            new_owner: String::new(),
        });

        debug!("connection {} closed", self.unique_name);
    }

    fn ensure_open(&self, state: &BusState) -> Result<(), Error> {
        if state.closed.contains(&self.unique_name) {
            return Err(Error::Closed(self.unique_name.clone()));
        }

        Ok(())
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscription on an in-memory bus.
#[derive(Debug)]
pub struct MemorySignalStream {
    rule: MatchRule,
    receiver: broadcast::Receiver<Signal>,
}

#[async_trait]
impl SignalStream for MemorySignalStream {
    async fn next(&mut self) -> Option<Signal> {
        loop {
            match self.receiver.recv().await {
                Ok(signal) if self.rule.matches(&signal) => return Some(signal),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "subscription {:?} lagged, {} signals dropped",
                        self.rule, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
impl Bus for MemoryBus {
    type Error = Error;
    type Stream = MemorySignalStream;

    fn unique_name(&self) -> &str {
        &self.unique_name
    }

    async fn request_name(&self, name: &str) -> Result<(), Self::Error> {
        let mut state = self.shared.state.lock().await;
        self.ensure_open(&state)?;

        match state.names.get(name) {
            Some(owner) if *owner == self.unique_name => Ok(()),
            Some(_) => Err(Error::NameTaken(name.to_string())),
            None => {
                state
                    .names
                    .insert(name.to_string(), self.unique_name.clone());

                self.shared.publish(Signal::NameOwnerChanged {
                    name: name.to_string(),
                    old_owner: String::new(),
                    new_owner: self.unique_name.clone(),
                });

                Ok(())
            }
        }
    }

    async fn get_object(
        &self,
        path: &str,
        interfaces: &[&str],
    ) -> Result<Option<String>, Self::Error> {
        let state = self.shared.state.lock().await;
        self.ensure_open(&state)?;

        let owner = state.objects.get(path).and_then(|published| {
            interfaces
                .iter()
                .find_map(|interface| published.get(*interface))
                .map(|published| published.owner.clone())
        });

        Ok(owner.map(|owner| state.well_known_name_of(&owner).unwrap_or(owner)))
    }

    async fn get_all_properties(
        &self,
        service: &str,
        path: &str,
        interface: &str,
    ) -> Result<PropertyMap, Self::Error> {
        let state = self.shared.state.lock().await;
        self.ensure_open(&state)?;

        let owner = state.resolve(service).ok_or_else(|| Error::NoSuchObject {
            service: service.to_string(),
            path: path.to_string(),
        })?;

        let interfaces = state
            .objects
            .get(path)
            .ok_or_else(|| Error::NoSuchObject {
                service: service.to_string(),
                path: path.to_string(),
            })?;

        interfaces
            .get(interface)
            .filter(|published| published.owner == owner)
            .map(|published| published.properties.clone())
            .ok_or_else(|| Error::NoSuchInterface {
                path: path.to_string(),
                interface: interface.to_string(),
            })
    }

    async fn add_interface(
        &self,
        path: &str,
        interface: &str,
        properties: PropertyMap,
    ) -> Result<(), Self::Error> {
        let mut state = self.shared.state.lock().await;
        self.ensure_open(&state)?;

        let interfaces = state.objects.entry(path.to_string()).or_default();
        if interfaces.contains_key(interface) {
            return Err(Error::InterfaceExists {
                path: path.to_string(),
                interface: interface.to_string(),
            });
        }

        interfaces.insert(
            interface.to_string(),
            PublishedInterface {
                owner: self.unique_name.clone(),
                properties: properties.clone(),
            },
        );

        let mut added = InterfaceMap::new();
        added.insert(interface.to_string(), properties);

        self.shared.publish(Signal::InterfacesAdded {
            path: path.to_string(),
            interfaces: added,
        });

        Ok(())
    }

    async fn remove_interface(&self, path: &str, interface: &str) -> Result<(), Self::Error> {
        let mut state = self.shared.state.lock().await;
        self.ensure_open(&state)?;

        state.owned_interface_mut(&self.unique_name, path, interface)?;

        if let Some(interfaces) = state.objects.get_mut(path) {
            interfaces.remove(interface);
            if interfaces.is_empty() {
                state.objects.remove(path);
            }
        }

        self.shared.publish(Signal::InterfacesRemoved {
            path: path.to_string(),
            interfaces: vec![interface.to_string()],
        });

        Ok(())
    }

    async fn set_property(
        &self,
        path: &str,
        interface: &str,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), Self::Error> {
        let mut state = self.shared.state.lock().await;
        self.ensure_open(&state)?;

        let published = state.owned_interface_mut(&self.unique_name, path, interface)?;

        if published.properties.get(name) == Some(&value) {
            return Ok(());
        }

        published.properties.insert(name.to_string(), value.clone());

        let mut changed = PropertyMap::new();
        changed.insert(name.to_string(), value);

        self.shared.publish(Signal::PropertiesChanged {
            path: path.to_string(),
            interface: interface.to_string(),
            changed,
        });

        Ok(())
    }

    async fn emit(&self, path: &str, interface: &str, member: &str) -> Result<(), Self::Error> {
        let mut state = self.shared.state.lock().await;
        self.ensure_open(&state)?;

        state.owned_interface_mut(&self.unique_name, path, interface)?;

        self.shared.publish(Signal::Emitted {
            path: path.to_string(),
            interface: interface.to_string(),
            member: member.to_string(),
        });

        Ok(())
    }

    fn subscribe(&self, rule: MatchRule) -> Self::Stream {
        MemorySignalStream {
            rule,
            receiver: self.shared.signals.subscribe(),
        }
    }
}
