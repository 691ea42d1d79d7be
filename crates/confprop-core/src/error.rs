use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum PropagationError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

pub type Result<T> = std::result::Result<T, PropagationError>;

/// Failure of a single outbound call to a downstream capability.
///
/// Always transient from the caller's point of view: nothing is retried
/// in-process, redelivery of the underlying records is the retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("downstream call timed out after {0:?}")]
    Timeout(Duration),

    #[error("downstream call failed: {0}")]
    Failed(String),
}

impl NotifyError {
    pub fn failed(msg: impl Into<String>) -> Self {
        NotifyError::Failed(msg.into())
    }
}

impl From<PropagationError> for NotifyError {
    fn from(err: PropagationError) -> Self {
        NotifyError::Failed(err.to_string())
    }
}
