//! Core types and capability traits for configuration change propagation.
//!
//! The configuration store partitions items by entity type and exposes an
//! ordered change log. Downstream crates consume that log (`confprop-stream`)
//! or feed registrations into the store (`confprop-gateway`); both meet here
//! through the traits in [`traits`].

pub mod config;
pub mod error;
pub mod filter;
pub mod report;
pub mod store;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{
    env_to_bool, env_to_list, ConfigError, ConfigLoader, GatewayConfig, LoggingConfig,
    PropagationConfig, StreamConfig,
};
pub use error::*;
pub use filter::*;
pub use report::*;
pub use store::*;
pub use traits::*;
pub use types::*;
