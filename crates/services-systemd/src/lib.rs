//! Services implementation for a real controller: firmware environment,
//! os-release and systemd.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod fw_env;
mod os_release;
mod units;

pub use error::Error;
use error::Result;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use rbmc_services::{Services, UnitState};

/// Firmware environment variable holding the slot position.
const POSITION_VAR: &str = "bmc_position";

/// Firmware environment variable holding the provisioning flag.
const PROVISIONED_VAR: &str = "bmc_provisioned";

/// Options for [`SystemdServices`].
#[derive(Clone, Debug)]
pub struct SystemdServicesOptions {
    /// Path to the `fw_printenv` tool.
    pub fw_printenv_path: PathBuf,

    /// Path to the os-release file.
    pub os_release_path: PathBuf,

    /// How often to poll a starting unit's state.
    pub unit_poll_interval: Duration,
}

impl Default for SystemdServicesOptions {
    fn default() -> Self {
        Self {
            fw_printenv_path: PathBuf::from("/sbin/fw_printenv"),
            os_release_path: PathBuf::from("/etc/os-release"),
            unit_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Reads controller facts from the system and starts units through systemd.
#[derive(Clone, Debug, Default)]
pub struct SystemdServices {
    options: SystemdServicesOptions,
}

impl SystemdServices {
    /// Creates a new instance of `SystemdServices`.
    #[must_use]
    pub const fn new(options: SystemdServicesOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Services for SystemdServices {
    type Error = Error;

    async fn get_bmc_position(&self) -> Result<usize> {
        let value = fw_env::read_var(&self.options.fw_printenv_path, POSITION_VAR)
            .await?
            .ok_or(Error::MissingEnvVar(POSITION_VAR))?;

        fw_env::parse_position(&value)
    }

    async fn get_fw_version(&self) -> Result<String> {
        os_release::read_version_id(&self.options.os_release_path).await
    }

    async fn is_provisioned(&self) -> Result<bool> {
        let value = fw_env::read_var(&self.options.fw_printenv_path, PROVISIONED_VAR).await?;

        Ok(fw_env::parse_provisioned(value.as_deref()))
    }

    async fn start_unit(&self, unit_name: &str) -> Result<UnitState> {
        units::start_and_wait(unit_name, self.options.unit_poll_interval).await
    }
}
