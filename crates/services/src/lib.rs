//! Abstract interface for the system facts and units the redundancy manager
//! depends on.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::{self, Debug};

use async_trait::async_trait;

/// Marker trait for `Services` errors
pub trait ServicesError: Debug + Error + Send + Sync + 'static {}

/// The terminal state a started unit settled in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitState {
    /// The unit reached the active state.
    Active,

    /// The unit failed to start.
    Failed,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Wraps the system interfaces so the business logic doesn't need to know
/// how the data is obtained.
#[async_trait]
pub trait Services
where
    Self: Send + Sync + 'static,
{
    /// The error type for service operations.
    type Error: ServicesError;

    /// Returns this controller's slot position.
    async fn get_bmc_position(&self) -> Result<usize, Self::Error>;

    /// Returns this controller's firmware version identifier.
    async fn get_fw_version(&self) -> Result<String, Self::Error>;

    /// Returns whether this controller is provisioned.
    async fn is_provisioned(&self) -> Result<bool, Self::Error>;

    /// Starts a unit and waits until it settles as active or failed.
    async fn start_unit(&self, unit_name: &str) -> Result<UnitState, Self::Error>;
}
