use crate::{Error, Result};

use std::time::Duration;

use rbmc_services::UnitState;
use systemctl::SystemCtl;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Asks systemd to start `unit_name`, then polls its active state until it
/// settles as active or failed.
pub async fn start_and_wait(unit_name: &str, poll_interval: Duration) -> Result<UnitState> {
    info!("starting unit {}", unit_name);

    let unit = unit_name.to_string();
    let status = tokio::task::spawn_blocking(move || SystemCtl::default().start(&unit))
        .await?
        .map_err(|e| Error::Io("failed to run systemctl start", e))?;

    if !status.success() {
        return Err(Error::NonZeroExit("systemctl start", status));
    }

    let settled = loop {
        tokio::time::sleep(poll_interval).await;

        match active_state(unit_name).await? {
            ActiveState::Active => break UnitState::Active,
            ActiveState::Failed => break UnitState::Failed,
            ActiveState::Pending(state) => debug!("unit {} is {}", unit_name, state),
        }
    };

    info!(
        "finished waiting for {} to start (result = {})",
        unit_name, settled
    );

    Ok(settled)
}

#[derive(Debug, PartialEq, Eq)]
enum ActiveState {
    Active,
    Failed,
    Pending(String),
}

impl ActiveState {
    fn parse(output: &str) -> Self {
        match output.trim() {
            "active" => Self::Active,
            "failed" => Self::Failed,
            other => Self::Pending(other.to_string()),
        }
    }
}

async fn active_state(unit_name: &str) -> Result<ActiveState> {
    // `is-active` exits non-zero for anything but "active", so only stdout matters.
    let output = Command::new("systemctl")
        .args(["is-active", unit_name])
        .output()
        .await
        .map_err(|e| Error::Io("failed to run systemctl is-active", e))?;

    let stdout = String::from_utf8(output.stdout)?;

    if stdout.trim().is_empty() {
        warn!(
            "unable to determine if {} is running, assuming it isn't",
            unit_name
        );
        return Ok(ActiveState::Pending("inactive".to_string()));
    }

    Ok(ActiveState::parse(&stdout))
}
