use config as cfg;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::TrustedOrganization;

pub const DEFAULT_CONFIG_FILE: &str = "confprop";
pub const ENV_PREFIX: &str = "CONFPROP";
pub const DEFAULT_REGISTRATION_MARKER: &str = "/instance-scheduler/do-not-delete-manually";
pub const DEFAULT_EVENT_SOURCE: &str = "external.config-agent";
pub const DEFAULT_DETAIL_TYPE: &str = "Parameter Store Change";

const MAX_WINDOW_SECS: u64 = 300;
const MAX_BATCH_SIZE: usize = 10_000;
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to load config: {0}")]
    Load(String),

    #[error("Missing required configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Static configuration of the propagation engine, immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PropagationConfig {
    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Regions the downstream handler schedules in; empty means the local region only
    #[serde(default)]
    pub regions: Vec<String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Change-stream batching settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// Maximum time a batch stays open after its first record (default: 60s)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Maximum records per batch (default: 100)
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Bound on a single notifier call (default: 60s)
    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_batch_size: default_max_batch_size(),
            notify_timeout_secs: default_notify_timeout_secs(),
        }
    }
}

impl StreamConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

/// Cross-account registration settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// The single organization whose accounts may register (required)
    #[serde(default)]
    pub trusted_organization_id: Option<String>,

    /// Parameter name spoke agents write to announce themselves
    #[serde(default = "default_registration_marker")]
    pub registration_marker: String,

    #[serde(default = "default_event_source")]
    pub event_source: String,

    #[serde(default = "default_detail_type")]
    pub detail_type: String,

    /// Bound on a single registration handler call (default: 60s)
    #[serde(default = "default_notify_timeout_secs")]
    pub handler_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            trusted_organization_id: None,
            registration_marker: default_registration_marker(),
            event_source: default_event_source(),
            detail_type: default_detail_type(),
            handler_timeout_secs: default_notify_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_window_secs() -> u64 {
    60
}
fn default_max_batch_size() -> usize {
    100
}
fn default_notify_timeout_secs() -> u64 {
    60
}
fn default_registration_marker() -> String {
    DEFAULT_REGISTRATION_MARKER.to_string()
}
fn default_event_source() -> String {
    DEFAULT_EVENT_SOURCE.to_string()
}
fn default_detail_type() -> String {
    DEFAULT_DETAIL_TYPE.to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl PropagationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.trusted_organization()?;

        if self.stream.window_secs == 0 || self.stream.window_secs > MAX_WINDOW_SECS {
            return Err(ConfigError::Invalid(format!(
                "stream.window_secs must be between 1 and {}, got {}",
                MAX_WINDOW_SECS, self.stream.window_secs
            )));
        }
        if self.stream.max_batch_size == 0 || self.stream.max_batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid(format!(
                "stream.max_batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.stream.max_batch_size
            )));
        }
        if self.stream.notify_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "stream.notify_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.gateway.handler_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "gateway.handler_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.gateway.registration_marker.trim().is_empty() {
            return Err(ConfigError::Missing("gateway.registration_marker".to_string()));
        }
        if self.regions.iter().any(|r| r.trim().is_empty()) {
            return Err(ConfigError::Invalid("regions must not contain blank entries".to_string()));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }
        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "Invalid log format: {}. Must be one of: pretty, json",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn trusted_organization(&self) -> Result<TrustedOrganization, ConfigError> {
        self.gateway
            .trusted_organization_id
            .as_deref()
            .and_then(|id| TrustedOrganization::new(id))
            .ok_or_else(|| ConfigError::Missing("gateway.trusted_organization_id".to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Load(e.to_string()))
    }
}

/// Split a comma separated variable, dropping blank items.
pub fn env_to_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn env_to_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "yes" | "1")
}

/// Loads configuration with the following precedence:
/// 1. Flat deployment variables (`SCHEDULE_REGIONS`, `TRUSTED_ORGANIZATION_ID`)
/// 2. `CONFPROP__SECTION__KEY` environment variables
/// 3. Config file (explicit path, or `./confprop.{toml,yaml,json}` if present)
/// 4. Defaults
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<PropagationConfig, ConfigError> {
        self.load_with_env(std::env::vars().collect())
    }

    /// Same as [`load`](Self::load) but reads variables from `env` instead of the process.
    pub fn load_with_env(&self, env: HashMap<String, String>) -> Result<PropagationConfig, ConfigError> {
        let builder = cfg::Config::builder();
        let builder = match &self.path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                builder.add_source(cfg::File::from(path.as_path()).required(true))
            }
            None => builder.add_source(cfg::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let settings = builder
            .add_source(
                cfg::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("regions")
                    .source(Some(env.clone())),
            )
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        let mut config: PropagationConfig = settings
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        Self::apply_env_overrides(&mut config, &env);
        config.validate()?;

        info!(
            window_secs = config.stream.window_secs,
            max_batch_size = config.stream.max_batch_size,
            regions = ?config.regions,
            config_file = ?self.path.as_deref().map(|p| p.display().to_string()),
            "configuration loaded"
        );
        Ok(config)
    }

    fn apply_env_overrides(config: &mut PropagationConfig, env: &HashMap<String, String>) {
        if let Some(regions) = env.get("SCHEDULE_REGIONS") {
            config.regions = env_to_list(regions);
        }
        if let Some(org) = env.get("TRUSTED_ORGANIZATION_ID") {
            config.gateway.trusted_organization_id = Some(org.trim().to_string());
        }
        if env.get("ENABLE_DEBUG_LOGS").map_or(false, |v| env_to_bool(v)) {
            config.logging.level = "debug".to_string();
        }
        // Only a bare level maps onto logging.level; directives stay with EnvFilter
        if let Some(level) = env.get("RUST_LOG").map(|l| l.trim().to_lowercase()) {
            if LOG_LEVELS.contains(&level.as_str()) {
                config.logging.level = level;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn valid() -> PropagationConfig {
        let mut config = PropagationConfig::default();
        config.gateway.trusted_organization_id = Some("o-abc123".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = PropagationConfig::default();
        assert_eq!(config.stream.window(), Duration::from_secs(60));
        assert_eq!(config.stream.max_batch_size, 100);
        assert_eq!(config.gateway.registration_marker, DEFAULT_REGISTRATION_MARKER);
        assert!(config.regions.is_empty());
    }

    #[test]
    fn missing_trusted_organization_is_fatal() {
        let err = PropagationConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));

        let mut blank = valid();
        blank.gateway.trusted_organization_id = Some("   ".to_string());
        assert!(matches!(blank.validate(), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_config_validation() {
        assert!(valid().validate().is_ok());

        let mut bad = valid();
        bad.stream.window_secs = 0;
        assert!(bad.validate().is_err());

        let mut bad = valid();
        bad.stream.window_secs = 301;
        assert!(bad.validate().is_err());

        let mut bad = valid();
        bad.stream.max_batch_size = 0;
        assert!(bad.validate().is_err());

        let mut bad = valid();
        bad.logging.level = "loud".to_string();
        assert!(bad.validate().is_err());

        let mut bad = valid();
        bad.regions = vec!["us-east-1".to_string(), " ".to_string()];
        assert!(bad.validate().is_err());
    }

    #[test]
    fn env_to_list_drops_blanks() {
        assert_eq!(env_to_list(" us-east-1, ,eu-west-1,"), vec!["us-east-1", "eu-west-1"]);
        assert!(env_to_list("").is_empty());
    }

    #[test]
    fn env_to_bool_accepts_common_truthy_values() {
        assert!(env_to_bool("True"));
        assert!(env_to_bool(" yes "));
        assert!(!env_to_bool("no"));
    }

    #[test]
    fn loads_file_and_applies_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
regions = ["us-east-1"]

[stream]
window_secs = 30

[gateway]
trusted_organization_id = "o-fromfile"
"#
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_file(file.path())
            .load_with_env(env(&[
                ("CONFPROP__STREAM__MAX_BATCH_SIZE", "25"),
                ("SCHEDULE_REGIONS", "eu-west-1, eu-central-1"),
            ]))
            .unwrap();

        assert_eq!(config.stream.window_secs, 30);
        assert_eq!(config.stream.max_batch_size, 25);
        assert_eq!(config.regions, vec!["eu-west-1", "eu-central-1"]);
        assert_eq!(config.trusted_organization().unwrap().organization_id(), "o-fromfile");
    }

    #[test]
    fn flat_organization_variable_satisfies_requirement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.toml");
        std::fs::write(&path, "").unwrap();

        let config = ConfigLoader::new()
            .with_file(&path)
            .load_with_env(env(&[("TRUSTED_ORGANIZATION_ID", "o-env")]))
            .unwrap();
        assert_eq!(config.gateway.trusted_organization_id.as_deref(), Some("o-env"));
    }

    fn load_with(pairs: &[(&str, &str)]) -> Result<PropagationConfig, ConfigError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.toml");
        std::fs::write(&path, "").unwrap();
        let mut vars = env(&[("TRUSTED_ORGANIZATION_ID", "o-env")]);
        vars.extend(env(pairs));
        ConfigLoader::new().with_file(&path).load_with_env(vars)
    }

    #[test]
    fn rust_log_directives_do_not_break_startup() {
        for directive in ["off", "confprop_stream", "confprop_core=debug", "info,confprop_stream=trace"] {
            let config = load_with(&[("RUST_LOG", directive)])
                .unwrap_or_else(|e| panic!("RUST_LOG={} failed: {}", directive, e));
            assert_eq!(config.logging.level, "info", "RUST_LOG={}", directive);
        }
    }

    #[test]
    fn rust_log_bare_level_sets_logging_level() {
        assert_eq!(load_with(&[("RUST_LOG", "WARN")]).unwrap().logging.level, "warn");
        assert_eq!(load_with(&[("RUST_LOG", " trace ")]).unwrap().logging.level, "trace");
    }

    #[test]
    fn debug_flag_enables_debug_logging() {
        assert_eq!(load_with(&[("ENABLE_DEBUG_LOGS", "True")]).unwrap().logging.level, "debug");
        assert_eq!(load_with(&[("ENABLE_DEBUG_LOGS", "no")]).unwrap().logging.level, "info");
        let both = load_with(&[("ENABLE_DEBUG_LOGS", "yes"), ("RUST_LOG", "error")]).unwrap();
        assert_eq!(both.logging.level, "error");
    }

    #[test]
    fn explicit_missing_file_is_reported() {
        let err = ConfigLoader::new()
            .with_file("/definitely/not/here.toml")
            .load_with_env(HashMap::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = valid();
        let text = config.to_toml().unwrap();
        let parsed: PropagationConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
