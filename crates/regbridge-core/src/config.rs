/*!
 * Configuration management for regbridge.
 *
 * Configuration is layered: built-in defaults, then an optional TOML file,
 * then environment variables (`REGBRIDGE__MQTT__HOST=broker` style).
 */
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::utils::millis_to_duration;

/// Core configuration for regbridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Action queue and dispatcher configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Broker configuration
    #[serde(default)]
    pub mqtt: MqttConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Driver name, used to derive the queue name, client id and topic prefix
    #[serde(default = "default_driver_name")]
    pub driver_name: String,

    /// Application environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,
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
}

/// Action queue and dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of devices held in the registry
    #[serde(default = "default_max_devices")]
    pub max_devices: usize,

    /// Capacity of the action queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Budget for datapoint read and write actions, in milliseconds
    #[serde(default = "default_normal_timeout_ms")]
    pub normal_timeout_ms: u64,

    /// Budget for device lifecycle actions, in milliseconds
    #[serde(default = "default_long_timeout_ms")]
    pub long_timeout_ms: u64,

    /// First delay between busy re-checks, in milliseconds
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Largest delay between busy re-checks, in milliseconds
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Let the completion probe report busy at random
    #[serde(default)]
    pub simulate_busy: bool,
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Connect to the broker at startup
    #[serde(default = "default_mqtt_enabled")]
    pub enabled: bool,

    /// Broker host
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Client identifier, `eti_client_{driver_name}` when unset
    #[serde(default)]
    pub client_id: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// QoS level used for subscribe and publish (0, 1 or 2)
    #[serde(default = "default_qos")]
    pub qos: u8,

    /// Topic prefix, `eti/{driver_name}` when unset
    #[serde(default)]
    pub topic_prefix: Option<String>,

    /// Capacity of the client request channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Config {
    /// Name of the action queue
    pub fn queue_name(&self) -> String {
        format!("/dev_act_q_eti_{}", self.general.driver_name)
    }

    /// Broker client identifier
    pub fn client_id(&self) -> String {
        self.mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("eti_client_{}", self.general.driver_name))
    }

    /// Prefix in front of every register topic
    pub fn topic_prefix(&self) -> String {
        self.mqtt
            .topic_prefix
            .clone()
            .unwrap_or_else(|| format!("eti/{}", self.general.driver_name))
    }

    /// Check values the rest of the system relies on
    pub fn validate(&self) -> Result<()> {
        if self.general.driver_name.trim().is_empty() {
            return Err(Error::config("general.driver_name must not be empty"));
        }
        if self.dispatcher.queue_capacity == 0 {
            return Err(Error::config("dispatcher.queue_capacity must be greater than zero"));
        }
        if self.dispatcher.max_devices == 0 {
            return Err(Error::config("dispatcher.max_devices must be greater than zero"));
        }
        if self.mqtt.qos > 2 {
            return Err(Error::config(format!("mqtt.qos {} is not 0, 1 or 2", self.mqtt.qos)));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(Error::config("mqtt.channel_capacity must be greater than zero"));
        }
        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl DispatcherConfig {
    /// Budget for datapoint read and write actions
    pub fn normal_timeout(&self) -> Duration {
        millis_to_duration(self.normal_timeout_ms)
    }

    /// Budget for device lifecycle actions
    pub fn long_timeout(&self) -> Duration {
        millis_to_duration(self.long_timeout_ms)
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            driver_name: default_driver_name(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_devices: default_max_devices(),
            queue_capacity: default_queue_capacity(),
            normal_timeout_ms: default_normal_timeout_ms(),
            long_timeout_ms: default_long_timeout_ms(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
            simulate_busy: false,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_enabled(),
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: None,
            keep_alive_secs: default_keep_alive_secs(),
            qos: default_qos(),
            topic_prefix: None,
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_driver_name() -> String {
    "regbridge".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_devices() -> usize {
    64
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_normal_timeout_ms() -> u64 {
    30_000
}

fn default_long_timeout_ms() -> u64 {
    50_000
}

fn default_retry_initial_ms() -> u64 {
    1
}

fn default_retry_max_ms() -> u64 {
    50
}

fn default_mqtt_enabled() -> bool {
    true
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_qos() -> u8 {
    1
}

fn default_channel_capacity() -> usize {
    100
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
    override_with: Option<Config>,
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
    pub fn override_with(mut self, config: Config) -> Self {
        self.override_with = Some(config);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        let mut config_builder = ConfigLib::builder();

        let default_config = Config::default();
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

        let mut config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        if let Some(override_config) = self.override_with {
            config = override_config;
        }

        config.validate()?;

        info!("Configuration loaded for driver {}", config.general.driver_name);
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone)]
pub struct SharedConfig(Arc<Config>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &Config {
        &self.0
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl AsRef<Config> for SharedConfig {
    fn as_ref(&self) -> &Config {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.driver_name, "regbridge");
        assert_eq!(config.dispatcher.queue_capacity, 4096);
        assert_eq!(config.dispatcher.normal_timeout(), Duration::from_secs(30));
        assert_eq!(config.dispatcher.long_timeout(), Duration::from_secs(50));
        assert_eq!(config.mqtt.qos, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_names() {
        let mut config = Config::default();
        config.general.driver_name = "boiler".to_string();

        assert_eq!(config.queue_name(), "/dev_act_q_eti_boiler");
        assert_eq!(config.client_id(), "eti_client_boiler");
        assert_eq!(config.topic_prefix(), "eti/boiler");

        config.mqtt.topic_prefix = Some("plant/7".to_string());
        assert_eq!(config.topic_prefix(), "plant/7");
    }

    #[test_log::test]
    fn test_config_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.general.driver_name, "regbridge");
        assert_eq!(config.logging.level, "info");
        assert!(config.mqtt.client_id.is_none());
    }

    #[test_log::test]
    fn test_config_builder_with_file() -> Result<()> {
        let dir = tempdir().map_err(|e| Error::other(e.to_string()))?;
        let file_path = dir.path().join("regbridge.toml");

        {
            let mut file = File::create(&file_path)?;
            file.write_all(
                br#"
                [general]
                driver_name = "chiller"

                [dispatcher]
                max_devices = 8
                normal_timeout_ms = 250

                [mqtt]
                host = "broker.local"
                qos = 0
            "#,
            )?;
        }

        let config = ConfigBuilder::new().with_config_file(file_path).build()?;

        assert_eq!(config.general.driver_name, "chiller");
        assert_eq!(config.dispatcher.max_devices, 8);
        assert_eq!(config.dispatcher.normal_timeout_ms, 250);
        assert_eq!(config.dispatcher.long_timeout_ms, 50_000);
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.qos, 0);

        Ok(())
    }

    #[test]
    fn test_config_builder_with_env() -> Result<()> {
        env::set_var("REGBRIDGETEST__GENERAL__DRIVER_NAME", "env-driver");
        env::set_var("REGBRIDGETEST__MQTT__PORT", "8883");

        let config = ConfigBuilder::new()
            .with_environment_prefix("regbridgetest")
            .build()?;

        assert_eq!(config.general.driver_name, "env-driver");
        assert_eq!(config.mqtt.port, 8883);

        env::remove_var("REGBRIDGETEST__GENERAL__DRIVER_NAME");
        env::remove_var("REGBRIDGETEST__MQTT__PORT");

        Ok(())
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.dispatcher.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.mqtt.qos = 3;
        assert!(config.validate().is_err());

        let result = ConfigBuilder::new()
            .override_with(Config {
                general: GeneralConfig {
                    driver_name: " ".to_string(),
                    environment: default_environment(),
                },
                ..Config::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_to_toml() -> Result<()> {
        let rendered = Config::default().to_toml()?;
        assert!(rendered.contains("driver_name = \"regbridge\""));
        assert!(rendered.contains("[mqtt]"));
        Ok(())
    }

    #[test]
    fn test_shared_config() {
        let shared = SharedConfig::new(Config::default());
        let shared2 = shared.clone();
        assert_eq!(shared2.get().general.driver_name, "regbridge");
        assert_eq!(shared.as_ref().mqtt.port, 1883);
    }
}
