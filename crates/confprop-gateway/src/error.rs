use std::time::Duration;

use confprop_core::PropagationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Registration handler failed: {0}")]
    Handler(String),

    #[error("Registration handler timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Propagation(#[from] PropagationError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<GatewayError> for PropagationError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Propagation(inner) => inner,
            GatewayError::InvalidRegistration(msg) => PropagationError::InvalidRecord(msg),
            other => PropagationError::Store(other.to_string()),
        }
    }
}
