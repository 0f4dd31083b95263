//! Error types for the simulated services implementation.

use rbmc_services::ServicesError;
use thiserror::Error;

/// Error type for the simulated services implementation.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The position was configured as unreadable.
    #[error("position unavailable")]
    PositionUnavailable,

    /// The unit was configured to fail before it could be started.
    #[error("failed to start unit {0}")]
    StartUnit(String),
}

impl ServicesError for Error {}
