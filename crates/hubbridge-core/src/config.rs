/*!
 * Configuration management for hubbridge.
 *
 * This module provides functionality to load, validate, and access configuration
 * settings for the bridge: hub connection, command dispatch policy, classifier
 * heuristics and value-transform options.
 */
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Core configuration for the bridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Hub connection configuration
    #[serde(default)]
    pub hub: HubConfig,

    /// Outbound command dispatch configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Capability classification configuration
    #[serde(default)]
    pub classifier: ClassifierSettings,

    /// Value transform configuration
    #[serde(default)]
    pub transform: TransformSettings,

    /// Inbound attribute update configuration
    #[serde(default)]
    pub updates: UpdateConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Application version, reported to the hub
    #[serde(default = "default_app_version")]
    pub app_version: String,

    /// Address the hub should use to reach the bridge's webhook
    #[serde(default = "default_direct_ip")]
    pub direct_ip: String,

    /// Port the hub should use to reach the bridge's webhook
    #[serde(default = "default_direct_port")]
    pub direct_port: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to use JSON format for logs
    #[serde(default)]
    pub json_format: bool,

    /// Whether to include the event target in log lines
    #[serde(default = "default_true")]
    pub with_target: bool,
}

/// Temperature unit used by the hub for temperature attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    /// Degrees Fahrenheit
    #[serde(rename = "F", alias = "f")]
    Fahrenheit,
    /// Degrees Celsius
    #[serde(rename = "C", alias = "c")]
    Celsius,
}

impl TemperatureUnit {
    /// Parse the hub's `temperature_scale` value
    pub fn from_scale(scale: &str) -> Option<Self> {
        match scale.trim().to_ascii_uppercase().as_str() {
            "F" | "FAHRENHEIT" => Some(TemperatureUnit::Fahrenheit),
            "C" | "CELSIUS" => Some(TemperatureUnit::Celsius),
            _ => None,
        }
    }

    /// Short symbol of the unit
    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureUnit::Fahrenheit => "F",
            TemperatureUnit::Celsius => "C",
        }
    }
}

impl Default for TemperatureUnit {
    fn default() -> Self {
        TemperatureUnit::Fahrenheit
    }
}

/// Hub connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Base url of the hub on the local network (e.g. `http://192.168.1.10`)
    #[serde(default)]
    pub app_url_local: String,

    /// Base url of the hub's cloud endpoint
    #[serde(default)]
    pub app_url_cloud: String,

    /// Installed app id on the hub
    #[serde(default)]
    pub app_id: String,

    /// Shared access token, sent as a query parameter on every call
    #[serde(default)]
    pub access_token: String,

    /// Route requests through the cloud endpoint instead of the local one
    #[serde(default)]
    pub use_cloud: bool,

    /// Seconds between full device refreshes
    #[serde(default = "default_refresh_seconds")]
    pub refresh_seconds: u64,

    /// Seconds between status reports to the hub
    #[serde(default = "default_status_seconds")]
    pub status_seconds: u64,

    /// Timeout for the device list request in milliseconds
    #[serde(default = "default_device_list_timeout_ms")]
    pub device_list_timeout_ms: u64,

    /// Timeout for status and registration requests in milliseconds
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
}

impl HubConfig {
    /// Base url of the hub api for the selected route
    pub fn base_url(&self) -> String {
        let host = if self.use_cloud {
            &self.app_url_cloud
        } else {
            &self.app_url_local
        };
        format!("{}/apps/api/{}", host.trim_end_matches('/'), self.app_id)
    }

    /// Interval between device refreshes
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_seconds.max(1))
    }

    /// Interval between status reports
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_seconds.max(1))
    }
}

/// Outbound command dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Trailing debounce window for value-setting commands in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Commands subject to debouncing
    #[serde(default = "default_debounced_commands")]
    pub debounced_commands: Vec<String>,

    /// Whether jobs are coalesced into batched requests
    #[serde(default = "default_true")]
    pub batch_enabled: bool,

    /// Maximum number of jobs per batched request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Collection window for a batch in milliseconds
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,

    /// Total attempts per request, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial retry backoff in milliseconds, doubled per attempt
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound of the retry backoff in milliseconds
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Consecutive failures after which an endpoint is short-circuited
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time after the last failure before a short-circuited endpoint is retried
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Timeout of a single command request in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl DispatcherConfig {
    /// Debounce window
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Batch collection window
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    /// Retry backoff base
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Retry backoff cap
    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    /// Circuit breaker reset timeout
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Command request timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Whether a command is debounced
    pub fn is_debounced(&self, command: &str) -> bool {
        self.debounced_commands.iter().any(|c| c == command)
    }
}

/// Capability classification configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierSettings {
    /// Treat switches with "fan" in their name as fans
    #[serde(default)]
    pub consider_fan_by_name: bool,

    /// Treat switches with "light" in their name as lights
    #[serde(default)]
    pub consider_light_by_name: bool,

    /// Capabilities removed from specific devices before classification,
    /// keyed by device id
    #[serde(default)]
    pub excluded_capabilities: HashMap<String, Vec<String>>,
}

/// Value transform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSettings {
    /// Snap levels below 5 to 0 and above 95 to 100
    #[serde(default = "default_true")]
    pub round_levels: bool,

    /// Temperature unit used by the hub, until the hub reports its own scale
    #[serde(default)]
    pub temperature_unit: TemperatureUnit,
}

/// Inbound attribute update configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Capacity of the inbound update queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            app_version: default_app_version(),
            direct_ip: default_direct_ip(),
            direct_port: default_direct_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            with_target: true,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            app_url_local: String::new(),
            app_url_cloud: String::new(),
            app_id: String::new(),
            access_token: String::new(),
            use_cloud: false,
            refresh_seconds: default_refresh_seconds(),
            status_seconds: default_status_seconds(),
            device_list_timeout_ms: default_device_list_timeout_ms(),
            status_timeout_ms: default_status_timeout_ms(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            debounced_commands: default_debounced_commands(),
            batch_enabled: true,
            batch_size: default_batch_size(),
            batch_window_ms: default_batch_window_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            round_levels: true,
            temperature_unit: TemperatureUnit::default(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_app_name() -> String {
    "hubbridge".to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_direct_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_direct_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_refresh_seconds() -> u64 {
    3600
}

fn default_status_seconds() -> u64 {
    300
}

fn default_device_list_timeout_ms() -> u64 {
    10_000
}

fn default_status_timeout_ms() -> u64 {
    5_000
}

fn default_debounce_ms() -> u64 {
    600
}

fn default_debounced_commands() -> Vec<String> {
    [
        "setLevel",
        "setColorTemperature",
        "setThermostatMode",
        "setHue",
        "setSaturation",
        "setHeatingSetpoint",
        "setCoolingSetpoint",
        "setThermostatSetpoint",
        "setSpeed",
        "setPosition",
        "setVolume",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_window_ms() -> u64 {
    50
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_cap_ms() -> u64 {
    10_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_queue_capacity() -> usize {
    256
}

impl BridgeConfig {
    /// Parse a configuration from a TOML document
    pub fn from_toml_str(document: &str) -> Result<Self> {
        let config: BridgeConfig = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the bridge cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.batch_size == 0 {
            return Err(Error::config("dispatcher.batch_size must be at least 1"));
        }
        if self.dispatcher.max_attempts == 0 {
            return Err(Error::config("dispatcher.max_attempts must be at least 1"));
        }
        if self.dispatcher.failure_threshold == 0 {
            return Err(Error::config("dispatcher.failure_threshold must be at least 1"));
        }
        if self.updates.queue_capacity == 0 {
            return Err(Error::config("updates.queue_capacity must be at least 1"));
        }
        let has_url = !self.hub.app_url_local.is_empty() || !self.hub.app_url_cloud.is_empty();
        if has_url && self.hub.app_id.is_empty() {
            return Err(Error::config("hub.app_id is required when a hub url is set"));
        }
        if self.hub.use_cloud && self.hub.app_url_cloud.is_empty() {
            return Err(Error::config("hub.app_url_cloud is required when use_cloud is set"));
        }
        Ok(())
    }
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
    override_with: Option<BridgeConfig>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Override with an existing config
    pub fn override_with(mut self, config: BridgeConfig) -> Self {
        self.override_with = Some(config);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<BridgeConfig> {
        if let Some(override_config) = self.override_with {
            override_config.validate()?;
            return Ok(override_config);
        }

        let mut config_builder = ConfigLib::builder();

        let default_config = BridgeConfig::default();
        config_builder = config_builder.add_source(
            ConfigLib::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config_lib = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        let config: BridgeConfig = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        config.validate()?;
        info!("Configuration loaded successfully");
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone)]
pub struct SharedConfig(Arc<BridgeConfig>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: BridgeConfig) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &BridgeConfig {
        &self.0
    }
}

impl From<BridgeConfig> for SharedConfig {
    fn from(config: BridgeConfig) -> Self {
        Self::new(config)
    }
}

impl AsRef<BridgeConfig> for SharedConfig {
    fn as_ref(&self) -> &BridgeConfig {
        self.get()
    }
}
