//! Error types for redundancy management

use thiserror::Error;

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Redundancy management errors
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The manager was started more than once.
    #[error("manager already started")]
    AlreadyStarted,

    /// A bus operation failed.
    #[error("bus error while {0}: {1}")]
    Bus(&'static str, String),

    /// A property held a value that could not be interpreted.
    #[error("invalid value for property {property}: {reason}")]
    InvalidProperty {
        /// The property name.
        property: String,

        /// Why it was rejected.
        reason: String,
    },

    /// This controller's own position could not be read.
    #[error("failed to read local BMC position: {0}")]
    Position(String),

    /// A sibling watch task panicked while updating the cached sibling state.
    #[error("sibling state lock poisoned")]
    SiblingStatePoisoned,
}
