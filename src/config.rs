//! Configuration management for Beacon.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::delivery::DEFAULT_QUEUE_CAPACITY;
use crate::error::{BeaconError, Result};

/// Prefix for environment overrides, e.g. `BEACON__DELIVERY__QUEUE_CAPACITY`.
const ENV_PREFIX: &str = "BEACON";

/// Main configuration for Beacon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeaconConfig {
    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Delivery queue configuration
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Collector DSN; required to build a transport from configuration
    #[serde(default)]
    pub dsn: Option<String>,

    /// Per-request network timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Environment name stamped on captured events
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Release stamped on captured events
    #[serde(default)]
    pub release: Option<String>,

    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            timeout_ms: default_timeout_ms(),
            environment: default_environment(),
            release: None,
            headers: BTreeMap::new(),
        }
    }
}

impl TransportConfig {
    /// The timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_environment() -> String {
    "debug".to_string()
}

/// Delivery queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum number of concurrently outstanding requests
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl BeaconConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| BeaconError::Config(e.to_string()))
    }

    /// Load configuration from an optional YAML file, overridden by
    /// `BEACON__`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize::<Self>()?;

        Ok(config)
    }

    /// Reject settings the transport cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.delivery.queue_capacity == 0 {
            return Err(BeaconError::Config(
                "delivery.queue_capacity must be greater than zero".to_string(),
            ));
        }

        if self.delivery.queue_capacity > Semaphore::MAX_PERMITS {
            return Err(BeaconError::Config(format!(
                "delivery.queue_capacity must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }

        if self.transport.timeout_ms == 0 {
            return Err(BeaconError::Config(
                "transport.timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
