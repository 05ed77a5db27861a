//! In-memory RecordStore.
//!
//! Both the primary map and the [`SecondaryIndex`] live behind one
//! `RwLock`. Writers hold the write guard for the whole mutation, so a
//! reader always sees the two structures agree.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::storage::index::SecondaryIndex;
use crate::storage::key::{self, StorageKey};
use crate::storage::{Item, Patch, Record, RecordStore, Result, StorageError};
use crate::utils::clock::{Clock, SystemClock};

/// Primary map plus derived index. Only mutated through `insert`/`remove`.
#[derive(Default)]
struct Tables {
    records: BTreeMap<StorageKey, Record>,
    index: SecondaryIndex,
}

impl Tables {
    fn insert(&mut self, key: StorageKey, record: Record) {
        self.index.insert(&record.partition_key, &record.sort_key);
        self.records.insert(key, record);
    }

    fn remove(&mut self, key: &StorageKey, partition_key: &str, sort_key: &str) -> bool {
        self.index.remove(partition_key, sort_key);
        self.records.remove(key).is_some()
    }

    fn live(&self, key: &StorageKey, now_secs: i64) -> Option<&Record> {
        self.records.get(key).filter(|r| !r.is_expired(now_secs))
    }
}

/// RecordStore backed by ordered in-process maps.
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            clock,
        }
    }

    /// Records physically stored, expired ones included.
    pub async fn stored_count(&self) -> usize {
        self.tables.read().await.records.len()
    }

    /// Physically stored keys as `(partition_key, sort_key)`, expired ones included.
    pub async fn stored_keys(&self) -> Vec<(String, String)> {
        self.tables
            .read()
            .await
            .records
            .values()
            .map(|r| (r.partition_key.clone(), r.sort_key.clone()))
            .collect()
    }

    /// Secondary index entries as `(partition_key, sort_key)`, in index order.
    pub async fn index_entries(&self) -> Vec<(String, String)> {
        self.tables
            .read()
            .await
            .index
            .iter()
            .map(|(sort_key, partition_key)| (partition_key.to_string(), sort_key.to_string()))
            .collect()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, partition_key: &str, sort_key: &str, item: Item) -> Result<Record> {
        let key = key::encode(partition_key, sort_key)?;
        let mut tables = self.tables.write().await;
        let now = self.clock.now();

        let created_at = tables
            .live(&key, now.timestamp())
            .map(|existing| existing.created_at);
        let record = item.into_record(partition_key, sort_key, now, created_at)?;
        tables.insert(key, record.clone());

        debug!(
            partition_key = %partition_key,
            sort_key = %sort_key,
            replaced = created_at.is_some(),
            "Record stored"
        );
        Ok(record)
    }

    async fn get(&self, partition_key: &str, sort_key: &str) -> Result<Option<Record>> {
        let key = key::encode(partition_key, sort_key)?;
        let tables = self.tables.read().await;
        Ok(tables.live(&key, self.clock.now_secs()).cloned())
    }

    async fn query_by_partition(
        &self,
        partition_key: &str,
        sort_key_prefix: Option<&str>,
    ) -> Result<Vec<Record>> {
        let (start, end) = key::partition_range(partition_key, sort_key_prefix.unwrap_or(""))?;
        let end = match end {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };

        let tables = self.tables.read().await;
        let now_secs = self.clock.now_secs();
        Ok(tables
            .records
            .range((Bound::Included(start), end))
            .map(|(_, record)| record)
            .filter(|record| !record.is_expired(now_secs))
            .cloned()
            .collect())
    }

    async fn query_by_sort_prefix(&self, sort_key_prefix: &str) -> Result<Vec<Record>> {
        let tables = self.tables.read().await;
        let now_secs = self.clock.now_secs();
        Ok(tables
            .index
            .prefix(sort_key_prefix)
            .filter_map(|(sort_key, partition_key)| {
                let key = key::encode(partition_key, sort_key).ok()?;
                tables.live(&key, now_secs)
            })
            .cloned()
            .collect())
    }

    async fn scan(&self) -> Result<Vec<Record>> {
        let tables = self.tables.read().await;
        let now_secs = self.clock.now_secs();
        Ok(tables
            .records
            .values()
            .filter(|record| !record.is_expired(now_secs))
            .cloned()
            .collect())
    }

    async fn patch(&self, partition_key: &str, sort_key: &str, patch: Patch) -> Result<Record> {
        let key = key::encode(partition_key, sort_key)?;
        let mut tables = self.tables.write().await;
        let now = self.clock.now();

        let expression = patch.build(now)?;
        let now_secs = now.timestamp();
        let record = tables
            .records
            .get_mut(&key)
            .filter(|record| !record.is_expired(now_secs))
            .ok_or_else(|| StorageError::not_found(partition_key, sort_key))?;

        expression.apply(record);

        debug!(
            partition_key = %partition_key,
            sort_key = %sort_key,
            expression = %expression,
            "Record patched"
        );
        Ok(record.clone())
    }

    async fn delete(&self, partition_key: &str, sort_key: &str) -> Result<()> {
        let key = key::encode(partition_key, sort_key)?;
        let removed = self
            .tables
            .write()
            .await
            .remove(&key, partition_key, sort_key);

        debug!(
            partition_key = %partition_key,
            sort_key = %sort_key,
            removed,
            "Record deleted"
        );
        Ok(())
    }

    async fn expired_keys(&self, limit: usize) -> Result<Vec<StorageKey>> {
        let tables = self.tables.read().await;
        let now_secs = self.clock.now_secs();
        Ok(tables
            .records
            .iter()
            .filter(|(_, record)| record.is_expired(now_secs))
            .take(limit)
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn reap(&self, partition_key: &str, sort_key: &str) -> Result<bool> {
        let key = key::encode(partition_key, sort_key)?;
        let mut tables = self.tables.write().await;
        let now_secs = self.clock.now_secs();

        let expired = tables
            .records
            .get(&key)
            .is_some_and(|record| record.is_expired(now_secs));
        if !expired {
            return Ok(false);
        }
        Ok(tables.remove(&key, partition_key, sort_key))
    }
}
