use thiserror::Error;

/// Failure taxonomy of the tracking subsystem.
///
/// `SensorUnavailable` and `SyncFailure` are recovered inside the session
/// and only logged; `PersistenceFailure` on write is logged and tracking
/// continues in memory; `InitializationFailure` is returned to whoever
/// asked to start a session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackerError {
    #[error("motion sensor unavailable: {0}")]
    SensorUnavailable(String),
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
    #[error("sync failure: {0}")]
    SyncFailure(String),
    #[error("initialization failure: {0}")]
    InitializationFailure(String),
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing motion sensor")]
    MissingSensor,
    #[error("missing remote sync gateway")]
    MissingGateway,
    #[error("missing snapshot store")]
    MissingStore,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
