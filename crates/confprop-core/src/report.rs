use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChangeBatch, RegistrationEvent};

/// Message published to the error reporting channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorReport {
    /// The notifier rejected or timed out on a batch.
    BatchFailure {
        batch: ChangeBatch,
        error: String,
        reported_at: DateTime<Utc>,
    },
    /// The registration handler could not apply a spoke registration.
    RegistrationFailure {
        event: RegistrationEvent,
        error: String,
        reported_at: DateTime<Utc>,
    },
    /// Startup configuration was missing or invalid; the component refused to start.
    ConfigurationFault {
        error: String,
        reported_at: DateTime<Utc>,
    },
}

impl ErrorReport {
    pub fn batch_failure(batch: ChangeBatch, error: impl ToString) -> Self {
        ErrorReport::BatchFailure {
            batch,
            error: error.to_string(),
            reported_at: Utc::now(),
        }
    }

    pub fn registration_failure(event: RegistrationEvent, error: impl ToString) -> Self {
        ErrorReport::RegistrationFailure {
            event,
            error: error.to_string(),
            reported_at: Utc::now(),
        }
    }

    pub fn configuration_fault(error: impl ToString) -> Self {
        ErrorReport::ConfigurationFault {
            error: error.to_string(),
            reported_at: Utc::now(),
        }
    }

    pub fn error(&self) -> &str {
        match self {
            ErrorReport::BatchFailure { error, .. } => error,
            ErrorReport::RegistrationFailure { error, .. } => error,
            ErrorReport::ConfigurationFault { error, .. } => error,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
