use rbmc_bus::{BusError, BusErrorKind};
use thiserror::Error;

/// Errors returned by the in-memory bus.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The connection has been closed.
    #[error("connection {0} is closed")]
    Closed(String),

    /// The interface is already published on the object.
    #[error("interface {interface} already published at {path}")]
    InterfaceExists {
        /// The object path.
        path: String,

        /// The interface.
        interface: String,
    },

    /// The well-known name is owned by another connection.
    #[error("name {0} is owned by another connection")]
    NameTaken(String),

    /// The interface is not published at the path, or not by the caller.
    #[error("no interface {interface} at {path}")]
    NoSuchInterface {
        /// The object path.
        path: String,

        /// The interface.
        interface: String,
    },

    /// The service does not exist or publishes nothing at the path.
    #[error("no object {path} on service {service}")]
    NoSuchObject {
        /// The service name.
        service: String,

        /// The object path.
        path: String,
    },
}

impl BusError for Error {
    fn kind(&self) -> BusErrorKind {
        match self {
            Self::Closed(_) => BusErrorKind::Closed,
            Self::InterfaceExists { .. } => BusErrorKind::Other,
            Self::NameTaken(_) => BusErrorKind::NameTaken,
            Self::NoSuchInterface { .. } => BusErrorKind::NoSuchInterface,
            Self::NoSuchObject { .. } => BusErrorKind::NoSuchObject,
        }
    }
}
