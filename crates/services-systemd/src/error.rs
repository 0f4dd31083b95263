use std::num::ParseIntError;
use std::path::PathBuf;
use std::process::ExitStatus;

use rbmc_services::ServicesError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the systemd-backed services.
#[derive(Debug, Error)]
pub enum Error {
    /// Command output was not valid UTF-8.
    #[error(transparent)]
    BadUtf8(#[from] std::string::FromUtf8Error),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// A blocking helper task could not be joined.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    /// A required firmware environment variable is not set.
    #[error("firmware environment variable {0} is not set")]
    MissingEnvVar(&'static str),

    /// The os-release file has no version identifier.
    #[error("no VERSION_ID in {0:?}")]
    MissingVersion(PathBuf),

    /// A command exited unsuccessfully.
    #[error("{0} unexpectedly exited with non-zero code: {1}")]
    NonZeroExit(&'static str, ExitStatus),

    /// The position variable did not hold an integer.
    #[error("could not extract position from {0:?}: {1}")]
    ParsePosition(String, #[source] ParseIntError),
}

impl ServicesError for Error {}
