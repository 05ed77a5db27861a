//! Record storage.
//!
//! The [`RecordStore`] trait is the single seam every backend implements:
//! - [`MemoryRecordStore`]: ordered in-process maps with an explicit
//!   [`SecondaryIndex`]
//! - `SqliteRecordStore` (feature `sqlite`): one table plus a SQL index on
//!   `(sort_key, partition_key)`
//!
//! Expired records are invisible to every read path, whether or not the
//! [`TtlReaper`] has physically removed them yet.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::utils::clock::Clock;

pub mod index;
pub mod key;
pub mod memory;
pub mod reaper;
pub mod record;
pub mod update;

#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use index::SecondaryIndex;
pub use key::StorageKey;
pub use memory::MemoryRecordStore;
pub use reaper::{ReaperHandle, SweepReport, TtlReaper};
pub use record::{Attributes, Expiry, Item, Record, Value};
pub use update::{ExpiryUpdate, Patch, UpdateAction, UpdateExpression};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRecordStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Corrupt storage key: {0}")]
    CorruptKey(String),

    #[error("Record not found: partition_key={partition_key}, sort_key={sort_key}")]
    NotFound {
        partition_key: String,
        sort_key: String,
    },

    #[error("Reserved field cannot be written: {0}")]
    ReservedField(String),

    #[error("Field is both set and removed: {0}")]
    ConflictingFieldOp(String),

    #[error("Patch has no changes")]
    EmptyPatch,

    #[error("Invalid value for attribute {0}: numbers must be finite")]
    InvalidValue(String),

    #[error("Invalid expiry: {0} is not a positive Unix timestamp")]
    InvalidExpiry(i64),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    /// Stable name of the error kind, for responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::InvalidKey(_) => "InvalidKey",
            StorageError::CorruptKey(_) => "CorruptKey",
            StorageError::NotFound { .. } => "NotFound",
            StorageError::ReservedField(_) => "ReservedField",
            StorageError::ConflictingFieldOp(_) => "ConflictingFieldOp",
            StorageError::EmptyPatch => "EmptyPatch",
            StorageError::InvalidValue(_) => "InvalidValue",
            StorageError::InvalidExpiry(_) => "InvalidExpiry",
            StorageError::CorruptRecord(_) => "CorruptRecord",
            StorageError::Serialization(_) => "Serialization",
            StorageError::Io(_) => "Io",
            #[cfg(feature = "sqlite")]
            StorageError::Database(_) => "Database",
        }
    }

    pub(crate) fn not_found(partition_key: &str, sort_key: &str) -> Self {
        StorageError::NotFound {
            partition_key: partition_key.to_string(),
            sort_key: sort_key.to_string(),
        }
    }
}

/// Interface for composite-key record persistence.
///
/// `(partition_key, sort_key)` uniquely identifies a record. Mutations run in
/// a single-writer section per store; reads never observe a half-applied
/// mutation.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or fully replace the record at a key.
    ///
    /// `createdAt` is kept from a live record being replaced, otherwise set
    /// to now. Returns the stored record.
    async fn put(&self, partition_key: &str, sort_key: &str, item: Item) -> Result<Record>;

    /// Point lookup. None if absent or expired.
    async fn get(&self, partition_key: &str, sort_key: &str) -> Result<Option<Record>>;

    /// Live records in a partition, optionally filtered by sort-key prefix,
    /// ascending by sort key.
    async fn query_by_partition(
        &self,
        partition_key: &str,
        sort_key_prefix: Option<&str>,
    ) -> Result<Vec<Record>>;

    /// Live records from every partition whose sort key starts with `prefix`,
    /// ordered by `(sort_key, partition_key)`.
    async fn query_by_sort_prefix(&self, sort_key_prefix: &str) -> Result<Vec<Record>>;

    /// Every live record. Full-table, O(n): avoid on hot paths.
    async fn scan(&self) -> Result<Vec<Record>>;

    /// Apply a patch to a live record and return the result.
    async fn patch(&self, partition_key: &str, sort_key: &str, patch: Patch) -> Result<Record>;

    /// Remove a record. Absent keys are not an error.
    async fn delete(&self, partition_key: &str, sort_key: &str) -> Result<()>;

    /// Up to `limit` keys of records whose expiry has passed.
    async fn expired_keys(&self, limit: usize) -> Result<Vec<StorageKey>>;

    /// Delete a record only if it is still expired once the write section is
    /// held. Returns whether a record was removed.
    async fn reap(&self, partition_key: &str, sort_key: &str) -> Result<bool>;
}

/// Initialize storage based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
    clock: Arc<dyn Clock>,
) -> std::result::Result<Arc<dyn RecordStore>, Box<dyn std::error::Error>> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Storage: memory");
            Ok(Arc::new(MemoryRecordStore::with_clock(clock)))
        }
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            info!(path = %config.sqlite.path, "Storage: sqlite");
            let store = SqliteRecordStore::connect(&config.sqlite, clock).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err("SQLite feature not enabled".into())
        }
    }
}
