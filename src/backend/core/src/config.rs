//! Configuration management.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{LicenseError, Result};

const ENV_PREFIX: &str = "LICENSE";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Durable store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Event channel configuration
    #[serde(default)]
    pub events: EventsConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Location of the license document
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Redis URL of the shared event channel
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// Stream every replica publishes to and consumes from
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer name within the group
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Consumer group of this service
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Tag stamped on every published event
    #[serde(default = "default_source")]
    pub source: String,

    /// How long a publish waits for the broker to acknowledge
    #[serde(default = "default_publish_timeout", with = "humantime_serde")]
    pub publish_timeout: Duration,

    /// Upper bound on a single blocking read
    #[serde(default = "default_read_block", with = "humantime_serde")]
    pub read_block: Duration,

    /// Consecutive failed reads tolerated before the subscription gives up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            topic: default_topic(),
            client_id: default_client_id(),
            consumer_group: default_consumer_group(),
            source: default_source(),
            publish_timeout: default_publish_timeout(),
            read_block: default_read_block(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_store_path() -> PathBuf { PathBuf::from("data/licenses.json") }
fn default_broker_url() -> String { "redis://localhost:6379".to_string() }
fn default_topic() -> String { "license-events".to_string() }
fn default_client_id() -> String { "license-service".to_string() }
fn default_consumer_group() -> String { "license-service-group".to_string() }
fn default_source() -> String { "license-service".to_string() }
fn default_publish_timeout() -> Duration { Duration::from_secs(10) }
fn default_read_block() -> Duration { Duration::from_secs(5) }
fn default_max_reconnect_attempts() -> u32 { 5 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }

impl Config {
    /// Load configuration from environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the replication protocol cannot run with.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("events.source", &self.events.source),
            ("events.topic", &self.events.topic),
            ("events.consumer_group", &self.events.consumer_group),
            ("events.client_id", &self.events.client_id),
        ];

        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(LicenseError::configuration(format!("{key} must not be empty"))
                    .with_context("key", key));
            }
        }

        if self.events.publish_timeout.is_zero() {
            return Err(LicenseError::configuration(
                "events.publish_timeout must be greater than zero",
            ));
        }

        Ok(())
    }

    /// Address the HTTP server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
