use crate::{Error, Result};

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

/// Reads a variable from the firmware (u-boot) environment.
///
/// Returns `Ok(None)` when the tool reports the variable as unset.
pub async fn read_var(fw_printenv: &Path, name: &'static str) -> Result<Option<String>> {
    let output = Command::new(fw_printenv)
        .args(["-n", name])
        .output()
        .await
        .map_err(|e| Error::Io("failed to run fw_printenv", e))?;

    if !output.status.success() {
        debug!("fw_printenv reported {} as unset: {}", name, output.status);
        return Ok(None);
    }

    Ok(Some(String::from_utf8(output.stdout)?.trim().to_string()))
}

/// Parses the slot position out of the `bmc_position` variable.
pub fn parse_position(value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::ParsePosition(value.to_string(), e))
}

/// Interprets the `bmc_provisioned` variable. Anything but an explicit "no" is
/// provisioned.
pub fn parse_provisioned(value: Option<&str>) -> bool {
    !matches!(
        value.map(str::trim),
        Some("0" | "false" | "no" | "n")
    )
}
