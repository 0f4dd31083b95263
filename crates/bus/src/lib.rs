//! Abstract interface for the local IPC bus shared by the redundancy daemons.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod signal;
mod value;

/// Well-known names, paths and property names of the redundancy interfaces.
pub mod names;

pub use error::{BusError, BusErrorKind};
pub use signal::{MatchRule, Signal};
pub use value::{InterfaceMap, PropertyMap, PropertyValue, ValueTypeError};

use async_trait::async_trait;

/// A stream of signals selected by one [`MatchRule`].
#[async_trait]
pub trait SignalStream: Send + 'static {
    /// Waits for the next matching signal.
    ///
    /// Signals are yielded in the order the bus delivered them. Returns `None`
    /// once the bus has closed and no further signals can arrive.
    async fn next(&mut self) -> Option<Signal>;
}

/// A connection to a local IPC bus.
///
/// Every connection has a unique name assigned by the bus and may additionally
/// own well-known names. Objects are identified by a path and expose one or more
/// interfaces, each with a set of properties.
#[async_trait]
pub trait Bus
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for bus operations.
    type Error: BusError;

    /// The stream type returned by [`Bus::subscribe`].
    type Stream: SignalStream;

    /// The unique name the bus assigned to this connection.
    fn unique_name(&self) -> &str;

    /// Claims a well-known name for this connection.
    async fn request_name(&self, name: &str) -> Result<(), Self::Error>;

    /// Looks up which service currently implements any of `interfaces` at `path`.
    ///
    /// Returns `Ok(None)` when nothing on the bus implements them; that is an
    /// absence signal, not an error.
    async fn get_object(
        &self,
        path: &str,
        interfaces: &[&str],
    ) -> Result<Option<String>, Self::Error>;

    /// Reads every property of an interface published by `service`.
    async fn get_all_properties(
        &self,
        service: &str,
        path: &str,
        interface: &str,
    ) -> Result<PropertyMap, Self::Error>;

    /// Publishes an interface with its initial properties, emitting `InterfacesAdded`.
    async fn add_interface(
        &self,
        path: &str,
        interface: &str,
        properties: PropertyMap,
    ) -> Result<(), Self::Error>;

    /// Withdraws an interface published by this connection, emitting `InterfacesRemoved`.
    async fn remove_interface(&self, path: &str, interface: &str) -> Result<(), Self::Error>;

    /// Updates one property of an interface published by this connection.
    ///
    /// `PropertiesChanged` is only emitted when the stored value actually changes.
    async fn set_property(
        &self,
        path: &str,
        interface: &str,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), Self::Error>;

    /// Emits a payload-free signal from an object published by this connection.
    async fn emit(&self, path: &str, interface: &str, member: &str) -> Result<(), Self::Error>;

    /// Subscribes to the signals selected by `rule`.
    ///
    /// The match is live as soon as this returns, so no signal emitted afterwards
    /// is missed even if the stream is not polled right away.
    fn subscribe(&self, rule: MatchRule) -> Self::Stream;
}
