use crate::error::{Error, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";

/// Engine verbosity. Maps onto default tracing filter directives; `RUST_LOG`
/// overrides whatever is configured here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Minimal,
    #[default]
    Info,
    Verbose,
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(LogLevel::Minimal),
            "info" => Ok(LogLevel::Info),
            "verbose" => Ok(LogLevel::Verbose),
            other => Err(Error::configuration(format!(
                "unknown log level `{other}` (expected minimal, info, or verbose)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Subscription to sweep. `*` or empty resolves to the one subscription
    /// visible to the ambient credential.
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Resource group filter. Empty or `*` enumerates every group.
    #[serde(default)]
    pub resource_group: Option<String>,
    /// Comma-separated logical server names. Empty or `*` keeps every server.
    #[serde(default)]
    pub servers: Option<String>,
    /// Seconds to sleep between poll sweeps over in-flight operations.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Per-request timeout for management calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub log_level: LogLevel,
    /// When set, abort before discovery unless an active self-service
    /// planned-maintenance notification exists for the subscription.
    #[serde(default)]
    pub check_maintenance_notification: bool,
    #[serde(default = "default_management_endpoint")]
    pub management_endpoint: String,
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_management_endpoint() -> String {
    DEFAULT_MANAGEMENT_ENDPOINT.to_string()
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            subscription_id: None,
            resource_group: None,
            servers: None,
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            log_level: LogLevel::default(),
            check_maintenance_notification: false,
            management_endpoint: default_management_endpoint(),
        }
    }
}

impl SweepConfig {
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("SQLSWEEP").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_contract() {
        let config = SweepConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
        assert!(!config.check_maintenance_notification);
        assert_eq!(config.management_endpoint, DEFAULT_MANAGEMENT_ENDPOINT);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        assert_eq!(LogLevel::from_str("Verbose").unwrap(), LogLevel::Verbose);
        assert_eq!(LogLevel::from_str(" minimal ").unwrap(), LogLevel::Minimal);
        assert!(LogLevel::from_str("loud").is_err());
    }
}
