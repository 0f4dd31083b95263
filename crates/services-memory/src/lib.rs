//! Simulated services for tests and local development.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rbmc_services::{Services, UnitState};
use tokio::sync::Mutex;
use tracing::info;

/// What happens when a unit is started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitOutcome {
    /// The unit settles in the given state.
    Settles(UnitState),

    /// The start request itself fails.
    Errors,
}

/// Options for [`MemoryServices`].
#[derive(Clone, Debug)]
pub struct MemoryServicesOptions {
    /// The slot position, or `None` to simulate an unreadable position.
    pub position: Option<usize>,

    /// The firmware version reported.
    pub fw_version: String,

    /// Whether the controller reports itself provisioned.
    pub provisioned: bool,

    /// How long a started unit takes to settle.
    pub settle_time: Duration,
}

impl Default for MemoryServicesOptions {
    fn default() -> Self {
        Self {
            position: Some(0),
            fw_version: "simulated".to_string(),
            provisioned: true,
            settle_time: Duration::ZERO,
        }
    }
}

/// In-memory services. Units settle as active unless configured otherwise.
#[derive(Clone, Debug, Default)]
pub struct MemoryServices {
    options: MemoryServicesOptions,
    outcomes: Arc<Mutex<HashMap<String, UnitOutcome>>>,
    started: Arc<Mutex<Vec<String>>>,
}

impl MemoryServices {
    /// Creates a new instance of `MemoryServices`.
    #[must_use]
    pub fn new(options: MemoryServicesOptions) -> Self {
        Self {
            options,
            outcomes: Arc::new(Mutex::new(HashMap::new())),
            started: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Creates services for a controller in the given slot.
    #[must_use]
    pub fn with_position(position: usize) -> Self {
        Self::new(MemoryServicesOptions {
            position: Some(position),
            ..MemoryServicesOptions::default()
        })
    }

    /// Sets what happens when `unit_name` is started.
    pub async fn set_outcome(&self, unit_name: &str, outcome: UnitOutcome) {
        self.outcomes
            .lock()
            .await
            .insert(unit_name.to_string(), outcome);
    }

    /// Returns the units started so far, in order.
    pub async fn started_units(&self) -> Vec<String> {
        self.started.lock().await.clone()
    }
}

#[async_trait]
impl Services for MemoryServices {
    type Error = Error;

    async fn get_bmc_position(&self) -> Result<usize, Self::Error> {
        self.options.position.ok_or(Error::PositionUnavailable)
    }

    async fn get_fw_version(&self) -> Result<String, Self::Error> {
        Ok(self.options.fw_version.clone())
    }

    async fn is_provisioned(&self) -> Result<bool, Self::Error> {
        Ok(self.options.provisioned)
    }

    async fn start_unit(&self, unit_name: &str) -> Result<UnitState, Self::Error> {
        info!("starting unit {}", unit_name);
        self.started.lock().await.push(unit_name.to_string());

        let outcome = self
            .outcomes
            .lock()
            .await
            .get(unit_name)
            .copied()
            .unwrap_or(UnitOutcome::Settles(UnitState::Active));

        match outcome {
            UnitOutcome::Settles(state) => {
                tokio::time::sleep(self.options.settle_time).await;
                info!(
                    "finished waiting for {} to start (result = {})",
                    unit_name, state
                );
                Ok(state)
            }
            UnitOutcome::Errors => Err(Error::StartUnit(unit_name.to_string())),
        }
    }
}
