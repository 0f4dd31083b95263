use std::error::Error;
use std::fmt::{self, Debug};

/// Marker trait for `Bus` errors
pub trait BusError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> BusErrorKind;
}

/// The kind of bus error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BusErrorKind {
    /// No object is published at the requested path by the requested service.
    NoSuchObject,

    /// The object does not implement the requested interface.
    NoSuchInterface,

    /// The well-known name is owned by another connection.
    NameTaken,

    /// The connection or the bus has been closed.
    Closed,

    /// Other/unknown error
    Other,
}

impl fmt::Display for BusErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
