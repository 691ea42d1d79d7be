use std::collections::BTreeSet;

use confprop_core::{GatewayConfig, RegistrationAction};

use crate::event::BusEvent;

/// Subscription pattern for registration events on the hub's bus.
///
/// Each set is an any-of match on the corresponding `detail` field; the
/// fields must all match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPattern {
    pub source: String,
    pub detail_type: String,
    pub names: BTreeSet<String>,
    pub operations: BTreeSet<String>,
    pub types: BTreeSet<String>,
}

impl EventPattern {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            source: config.event_source.clone(),
            detail_type: config.detail_type.clone(),
            names: BTreeSet::from([config.registration_marker.clone()]),
            operations: [RegistrationAction::Create, RegistrationAction::Delete]
                .iter()
                .map(|a| a.to_string())
                .collect(),
            types: BTreeSet::from(["String".to_string()]),
        }
    }

    pub fn matches(&self, event: &BusEvent) -> bool {
        event.source == self.source
            && event.detail_type == self.detail_type
            && detail_in(event, "name", &self.names)
            && detail_in(event, "operation", &self.operations)
            && detail_in(event, "type", &self.types)
    }
}

impl Default for EventPattern {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

fn detail_in(event: &BusEvent, field: &str, allowed: &BTreeSet<String>) -> bool {
    event
        .detail
        .get(field)
        .and_then(|v| v.as_str())
        .map_or(false, |v| allowed.contains(v))
}
