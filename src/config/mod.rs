//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod aggregation;
mod server;

pub use aggregation::{AggregationConfig, AggregationPlan, CascadeConfig, InboundConfig};
pub use server::ServerConfig;

use serde::Deserialize;

use crate::bus::MessagingConfig;
use crate::storage::StorageConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "USER_SERVICE_CONFIG";

/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "USER_SERVICE";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub messaging: MessagingConfig,
    pub aggregation: AggregationConfig,
    pub cascade: CascadeConfig,
    pub inbound: InboundConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, plan) in [
            ("retrieve_user_data", &self.aggregation.retrieve_user_data),
            ("get_all_user_data", &self.aggregation.get_all_user_data),
        ] {
            if plan.reply_queue.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "aggregation.{name}.reply_queue must not be empty"
                )));
            }
            if plan.timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "aggregation.{name}.timeout_ms must be positive"
                )));
            }
        }
        if self.inbound.queue.is_empty() {
            return Err(ConfigError::Invalid("inbound.queue must not be empty".to_string()));
        }
        Ok(())
    }
}
