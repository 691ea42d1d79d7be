use chrono::{DateTime, Utc};
use confprop_core::{RegistrationAction, RegistrationEvent};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Event-bus envelope as delivered to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub id: String,
    pub source: String,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    /// Account that emitted the event
    pub account: String,
    pub region: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub detail: serde_json::Value,
}

/// A bus event together with the sender's organization principal, as
/// attached by the transport. Never taken from the event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub principal_org_id: String,
    pub event: BusEvent,
}

/// `detail` of a parameter store change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterChangeDetail {
    pub name: String,
    pub operation: String,
    #[serde(rename = "type")]
    pub parameter_type: String,
}

impl BusEvent {
    pub fn parameter_detail(&self) -> Result<ParameterChangeDetail> {
        serde_json::from_value(self.detail.clone()).map_err(|e| {
            GatewayError::InvalidRegistration(format!("malformed detail in event {}: {}", self.id, e))
        })
    }

    /// Interpret the event as a spoke registration sent by `organization_id`.
    pub fn to_registration(&self, organization_id: &str) -> Result<RegistrationEvent> {
        let detail = self.parameter_detail()?;
        let action: RegistrationAction = detail
            .operation
            .parse()
            .map_err(GatewayError::InvalidRegistration)?;
        if self.account.trim().is_empty() {
            return Err(GatewayError::InvalidRegistration(format!(
                "event {} carries no source account",
                self.id
            )));
        }

        Ok(RegistrationEvent {
            source_account_id: self.account.clone(),
            organization_id: organization_id.to_string(),
            action,
            parameter_name: detail.name,
        })
    }
}
