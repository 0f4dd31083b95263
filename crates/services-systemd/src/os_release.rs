use crate::{Error, Result};

use std::path::Path;

/// Reads `VERSION_ID` out of an os-release file.
pub async fn read_version_id(path: &Path) -> Result<String> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Io("failed to read os-release", e))?;

    parse_version_id(&contents).ok_or_else(|| Error::MissingVersion(path.to_path_buf()))
}

fn parse_version_id(contents: &str) -> Option<String> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix("VERSION_ID="))
        .map(|value| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}
