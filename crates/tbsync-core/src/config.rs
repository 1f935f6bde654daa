//! Configuration management for tbsync.
//!
//! Configuration is loaded from (in priority order):
//! 1. Command-line overrides (applied by the binary)
//! 2. Environment variables (TBSYNC__ prefix, `__` separator)
//! 3. Config file (tbsync.toml)
//! 4. Defaults
//!
//! The resulting [`BootstrapConfig`] is built once and passed by reference
//! into every reconciler. Nothing downstream reads the process environment.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CoreError;

/// Top-level bootstrap configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub kafka: KafkaConfig,

    #[serde(default)]
    pub rule_chain: RuleChainConfig,

    /// Device type assigned to devices this tool creates.
    #[serde(default = "default_device_type")]
    pub device_type: String,

    /// Devices that must exist, each with a fixed access token.
    #[serde(default)]
    pub devices: Vec<DesiredDevice>,
}

/// Connection settings for the platform's REST API.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PlatformConfig {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_password")]
    pub password: String,

    /// Upper bound on every API request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long to wait for the health endpoint before giving up.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    #[serde(default = "default_ready_poll")]
    pub ready_poll_secs: u64,
}

impl PlatformConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_secs(self.ready_poll_secs)
    }
}

/// Target broker for the forwarding sink node. Embedded verbatim in the node configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct KafkaConfig {
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,

    #[serde(default = "default_topic")]
    pub topic: String,
}

/// Which rule chain to reconcile and what to install in it.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RuleChainConfig {
    /// Exact name of the rule chain to patch.
    #[serde(default = "default_chain_name")]
    pub name: String,

    /// Substring identifying the dispatch node type.
    #[serde(default = "default_dispatch_type")]
    pub dispatch_type: String,

    /// Exact type of the sink node.
    #[serde(default = "default_sink_type")]
    pub sink_type: String,

    /// Display name given to a newly installed sink node.
    #[serde(default = "default_sink_name")]
    pub sink_name: String,

    /// Label of the edge from the dispatch node to the sink.
    #[serde(default = "default_route_label")]
    pub route_label: String,
}

/// A device that must exist with the given access token.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DesiredDevice {
    pub name: String,
    pub token: String,
}

fn default_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_username() -> String {
    "tenant@thingsboard.org".to_string()
}

fn default_password() -> String {
    "tenant".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_ready_timeout() -> u64 {
    240
}

fn default_ready_poll() -> u64 {
    5
}

fn default_bootstrap_servers() -> String {
    "kafka:9092".to_string()
}

fn default_topic() -> String {
    "tb-telemetry".to_string()
}

fn default_chain_name() -> String {
    "Root Rule Chain".to_string()
}

fn default_dispatch_type() -> String {
    "TbMsgTypeSwitchNode".to_string()
}

fn default_sink_type() -> String {
    "org.thingsboard.rule.engine.kafka.TbKafkaNode".to_string()
}

fn default_sink_name() -> String {
    "Kafka sink".to_string()
}

fn default_route_label() -> String {
    "Post telemetry".to_string()
}

fn default_device_type() -> String {
    "drone".to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            username: default_username(),
            password: default_password(),
            request_timeout_secs: default_request_timeout(),
            ready_timeout_secs: default_ready_timeout(),
            ready_poll_secs: default_ready_poll(),
        }
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            topic: default_topic(),
        }
    }
}

impl Default for RuleChainConfig {
    fn default() -> Self {
        Self {
            name: default_chain_name(),
            dispatch_type: default_dispatch_type(),
            sink_type: default_sink_type(),
            sink_name: default_sink_name(),
            route_label: default_route_label(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            platform: PlatformConfig::default(),
            kafka: KafkaConfig::default(),
            rule_chain: RuleChainConfig::default(),
            device_type: default_device_type(),
            devices: Vec::new(),
        }
    }
}

impl BootstrapConfig {
    /// Load from `<file_prefix>.toml` (optional) layered under `TBSYNC__` environment variables.
    pub fn load(file_prefix: &str) -> Result<Self, CoreError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("TBSYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: BootstrapConfig = cfg.try_deserialize()?;
        tracing::debug!(
            url = %loaded.platform.url,
            devices = loaded.devices.len(),
            "Configuration loaded"
        );
        Ok(loaded)
    }

    /// Parse a device list in the `[{"name": "...", "token": "..."}]` form.
    pub fn parse_devices(raw: &str) -> Result<Vec<DesiredDevice>, CoreError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reject configurations no run could succeed with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.platform.url.trim().is_empty() {
            return Err(CoreError::Config("platform.url must not be empty".into()));
        }
        if self.platform.request_timeout_secs == 0 {
            return Err(CoreError::Config(
                "platform.request_timeout_secs must be positive".into(),
            ));
        }
        if self.rule_chain.dispatch_type.is_empty() || self.rule_chain.sink_type.is_empty() {
            return Err(CoreError::Config(
                "rule_chain.dispatch_type and rule_chain.sink_type must be set".into(),
            ));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.name.is_empty() {
                return Err(CoreError::Config("device name must not be empty".into()));
            }
            if device.token.is_empty() {
                return Err(CoreError::Config(format!(
                    "device {} has an empty token",
                    device.name
                )));
            }
            if !seen.insert(device.name.as_str()) {
                return Err(CoreError::Config(format!(
                    "device {} is listed more than once",
                    device.name
                )));
            }
        }
        Ok(())
    }
}
