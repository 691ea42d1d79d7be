//! Hub-side gateway for spoke account registration.
//!
//! Events flow `InboundEvent` -> [`TrustedChannel`] (sender organization and
//! subscription pattern) -> [`TrustGateway`] (routing, bounded handler call)
//! -> [`RegistrationHandler`](confprop_core::RegistrationHandler), normally a
//! [`SpokeRegistrationHandler`] over the configuration store.

pub mod error;
pub mod event;
pub mod gateway;
pub mod pattern;
pub mod registration;

pub use error::{GatewayError, Result};
pub use event::*;
pub use gateway::*;
pub use pattern::*;
pub use registration::*;
