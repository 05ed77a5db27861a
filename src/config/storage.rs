//! Storage configuration types.

use serde::Deserialize;

/// Storage type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Process-local, lost on exit.
    #[default]
    Memory,
    /// SQLite file (requires `sqlite` feature).
    Sqlite,
}

/// Storage configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// SQLite-specific configuration.
    pub sqlite: SqliteConfig,
}

/// SQLite-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file path. `:memory:` keeps the database in process.
    pub path: String,
    /// Connection pool size. Forced to 1 for `:memory:`.
    pub max_connections: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: "./data/tabula.db".to_string(),
            max_connections: 4,
        }
    }
}

impl SqliteConfig {
    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }
}
