use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// IO error
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// Redundancy manager error.
    #[error(transparent)]
    Redundancy(#[from] rbmc_redundancy::Error),

    /// Could not set global default subscriber.
    #[error("could not set global default subscriber: {0}")]
    SetTracing(#[from] tracing::dispatcher::SetGlobalDefaultError),
}
