use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Mirror file is missing its END terminator")]
    MirrorTruncated,
    #[error("The scheduler has been shut down")]
    SchedulerStopped,
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for PoolError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<anyhow::Error> for PoolError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(error.to_string())
    }
}

impl From<String> for PoolError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}
