//! Cross-account trust gateway.
//!
//! Spoke accounts announce themselves by writing a marker parameter; the
//! resulting bus event reaches the hub through a [`TrustedChannel`] that
//! admits only senders from the trusted organization. Rejection is silent:
//! the sender is told nothing, operators see a debug trace and a counter.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use confprop_core::{ConfigError, PropagationConfig, RegistrationEvent, RegistrationHandler, TrustedOrganization};
use metrics::counter;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::event::InboundEvent;
use crate::pattern::EventPattern;

/// Why an event was dropped before reaching the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    UntrustedOrganization,
    UnmatchedPattern,
    Malformed(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::UntrustedOrganization => f.write_str("untrusted organization"),
            Rejection::UnmatchedPattern => f.write_str("not a registration event"),
            Rejection::Malformed(reason) => write!(f, "malformed event: {}", reason),
        }
    }
}

/// Transport-facing result of one registration event.
///
/// `Accepted` only means the event was handed to the registration handler;
/// handler failures surface through the handler's own error channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Accepted => f.write_str("accepted"),
            Verdict::Rejected(reason) => write!(f, "rejected ({})", reason),
        }
    }
}

fn reject(reason: Rejection) -> Verdict {
    debug!(%reason, "registration event rejected");
    counter!("confprop_registrations_rejected").increment(1);
    Verdict::Rejected(reason)
}

/// Stateless application side of the gateway: trust check, routing and the
/// single bounded handler call.
pub struct TrustGateway {
    trusted: TrustedOrganization,
    registration_marker: String,
    handler: Arc<dyn RegistrationHandler>,
    handler_timeout: Duration,
}

impl TrustGateway {
    pub fn new(
        trusted: TrustedOrganization,
        registration_marker: impl Into<String>,
        handler: Arc<dyn RegistrationHandler>,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            trusted,
            registration_marker: registration_marker.into(),
            handler,
            handler_timeout,
        }
    }

    pub fn from_config(
        config: &PropagationConfig,
        handler: Arc<dyn RegistrationHandler>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.trusted_organization()?,
            config.gateway.registration_marker.clone(),
            handler,
            config.gateway.handler_timeout(),
        ))
    }

    pub fn trusted_organization(&self) -> &TrustedOrganization {
        &self.trusted
    }

    async fn invoke_handler(&self, event: &RegistrationEvent) -> Result<String, GatewayError> {
        match timeout(self.handler_timeout, self.handler.handle(event)).await {
            Ok(result) => result.map_err(|e| GatewayError::Handler(e.to_string())),
            Err(_) => Err(GatewayError::Timeout(self.handler_timeout)),
        }
    }

    pub async fn on_registration_event(&self, event: &RegistrationEvent) -> Verdict {
        if !self.trusted.admits(&event.organization_id) {
            return reject(Rejection::UntrustedOrganization);
        }
        if event.parameter_name != self.registration_marker {
            return reject(Rejection::UnmatchedPattern);
        }

        counter!("confprop_registrations_accepted").increment(1);
        match self.invoke_handler(event).await {
            Ok(outcome) => info!(account = %event.source_account_id, action = %event.action, "{}", outcome),
            Err(e) => warn!(
                account = %event.source_account_id,
                action = %event.action,
                "{}",
                e
            ),
        }
        Verdict::Accepted
    }
}

/// Inbound channel of the gateway. Sender validation happens here, before
/// any event content is parsed or the gateway runs.
pub struct TrustedChannel {
    trusted: TrustedOrganization,
    pattern: EventPattern,
    gateway: TrustGateway,
}

impl TrustedChannel {
    pub fn new(pattern: EventPattern, gateway: TrustGateway) -> Self {
        Self {
            trusted: gateway.trusted_organization().clone(),
            pattern,
            gateway,
        }
    }

    pub fn from_config(
        config: &PropagationConfig,
        handler: Arc<dyn RegistrationHandler>,
    ) -> Result<Self, ConfigError> {
        let gateway = TrustGateway::from_config(config, handler)?;
        Ok(Self::new(EventPattern::from_config(&config.gateway), gateway))
    }

    pub fn pattern(&self) -> &EventPattern {
        &self.pattern
    }

    pub async fn deliver(&self, inbound: &InboundEvent) -> Verdict {
        if !self.trusted.admits(&inbound.principal_org_id) {
            return reject(Rejection::UntrustedOrganization);
        }
        if !self.pattern.matches(&inbound.event) {
            return reject(Rejection::UnmatchedPattern);
        }
        match inbound.event.to_registration(&inbound.principal_org_id) {
            Ok(event) => self.gateway.on_registration_event(&event).await,
            Err(e) => reject(Rejection::Malformed(e.to_string())),
        }
    }
}
