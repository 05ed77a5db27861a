//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod reaper;
mod storage;

pub use reaper::ReaperConfig;
pub use storage::{SqliteConfig, StorageConfig, StorageType};

use std::time::Duration;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "TABULA_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "TABULA";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "TABULA_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage backend selection.
    pub storage: StorageConfig,
    /// TTL reaper schedule.
    pub reaper: ReaperConfig,
    /// Entity helper defaults.
    pub entities: EntityConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }
}

/// Defaults for the profile/detail/activity helpers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    /// TTL applied to activities created without an explicit expiry.
    /// 0 disables the default (activities never expire).
    pub activity_ttl_secs: u64,
}

impl EntityConfig {
    /// Default activity TTL, or None if activities do not expire by default.
    pub fn activity_ttl(&self) -> Option<Duration> {
        if self.activity_ttl_secs > 0 {
            Some(Duration::from_secs(self.activity_ttl_secs))
        } else {
            None
        }
    }
}
