use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("motion sensor unavailable: {0}")]
    SensorUnavailable(String),
    #[error("sensor read timeout")]
    Timeout,
    #[error("remote store rejected {metric}: {reason}")]
    RemoteRejected { metric: String, reason: String },
    #[error("remote store offline")]
    RemoteOffline,
    #[error("malformed remote document: {0}")]
    Format(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
