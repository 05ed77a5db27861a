//! SQLite RecordStore implementation.
//!
//! One `records` table keyed by `(partition_key, sort_key)`; the secondary
//! index is the SQL index `idx_records_sort_key`, which SQLite maintains in
//! the same transaction as the row write. Attributes are stored as a JSON
//! object.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sea_query::{Cond, Expr, OnConflict, Order, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::SqliteConfig;
use crate::storage::key::{self, StorageKey};
use crate::storage::record::Attributes;
use crate::storage::schema::{self, Records};
use crate::storage::{Item, Patch, Record, RecordStore, Result, StorageError};
use crate::utils::clock::Clock;

/// SQLite implementation of RecordStore.
pub struct SqliteRecordStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    /// Single-writer section. SQLite serializes writers too, but holding the
    /// gate keeps read-modify-write mutations from racing for the lock.
    write_gate: Mutex<()>,
}

impl SqliteRecordStore {
    /// Create a store over an existing pool. Call [`init`](Self::init) before use.
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            write_gate: Mutex::new(()),
        }
    }

    /// Open (creating if missing) the configured database and its schema.
    pub async fn connect(config: &SqliteConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut pool_options = SqlitePoolOptions::new();
        if config.is_in_memory() {
            // Every connection to :memory: is a separate database; keep exactly one alive.
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            pool_options = pool_options.max_connections(config.max_connections.max(1));
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true);
        let pool = pool_options.connect_with(options).await?;

        let store = Self::new(pool, clock);
        store.init().await?;
        Ok(store)
    }

    /// Create the table and indexes if they do not exist.
    pub async fn init(&self) -> Result<()> {
        for statement in [
            schema::CREATE_RECORDS_TABLE,
            schema::CREATE_SORT_KEY_INDEX,
            schema::CREATE_EXPIRES_AT_INDEX,
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Base SELECT of every column.
    fn select_records() -> SelectStatement {
        Query::select()
            .columns([
                Records::PartitionKey,
                Records::SortKey,
                Records::Attributes,
                Records::CreatedAt,
                Records::UpdatedAt,
                Records::ExpiresAt,
            ])
            .from(Records::Table)
            .to_owned()
    }

    async fn fetch_records(&self, query: String) -> Result<Vec<Record>> {
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Live record at a key, read on the given connection.
    async fn live_record(
        conn: &mut SqliteConnection,
        partition_key: &str,
        sort_key: &str,
        now_secs: i64,
    ) -> Result<Option<Record>> {
        let query = Self::select_records()
            .and_where(Expr::col(Records::PartitionKey).eq(partition_key))
            .and_where(Expr::col(Records::SortKey).eq(sort_key))
            .cond_where(live(now_secs))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn put_in(
        conn: &mut SqliteConnection,
        partition_key: &str,
        sort_key: &str,
        item: Item,
        now: DateTime<Utc>,
    ) -> Result<Record> {
        let created_at = Self::live_record(conn, partition_key, sort_key, now.timestamp())
            .await?
            .map(|existing| existing.created_at);
        let record = item.into_record(partition_key, sort_key, now, created_at)?;

        let query = Query::insert()
            .into_table(Records::Table)
            .columns([
                Records::PartitionKey,
                Records::SortKey,
                Records::Attributes,
                Records::CreatedAt,
                Records::UpdatedAt,
                Records::ExpiresAt,
            ])
            .values_panic([
                record.partition_key.clone().into(),
                record.sort_key.clone().into(),
                serde_json::to_string(&record.attributes)?.into(),
                format_timestamp(record.created_at).into(),
                record.updated_at.map(format_timestamp).into(),
                record.expires_at.into(),
            ])
            .on_conflict(
                OnConflict::columns([Records::PartitionKey, Records::SortKey])
                    .update_columns([
                        Records::Attributes,
                        Records::CreatedAt,
                        Records::UpdatedAt,
                        Records::ExpiresAt,
                    ])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(record)
    }

    async fn patch_in(
        conn: &mut SqliteConnection,
        partition_key: &str,
        sort_key: &str,
        patch: Patch,
        now: DateTime<Utc>,
    ) -> Result<Record> {
        let expression = patch.build(now)?;
        let mut record = Self::live_record(conn, partition_key, sort_key, now.timestamp())
            .await?
            .ok_or_else(|| StorageError::not_found(partition_key, sort_key))?;

        expression.apply(&mut record);

        let query = Query::update()
            .table(Records::Table)
            .values([
                (
                    Records::Attributes,
                    serde_json::to_string(&record.attributes)?.into(),
                ),
                (
                    Records::UpdatedAt,
                    record.updated_at.map(format_timestamp).into(),
                ),
                (Records::ExpiresAt, record.expires_at.into()),
            ])
            .and_where(Expr::col(Records::PartitionKey).eq(partition_key))
            .and_where(Expr::col(Records::SortKey).eq(sort_key))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;

        debug!(
            partition_key = %partition_key,
            sort_key = %sort_key,
            expression = %expression,
            "Record patched"
        );
        Ok(record)
    }
}

/// Condition matching records that have not expired at `now_secs`.
fn live(now_secs: i64) -> Cond {
    Cond::any()
        .add(Expr::col(Records::ExpiresAt).is_null())
        .add(Expr::col(Records::ExpiresAt).gt(now_secs))
}

/// Condition matching sort keys that start with `prefix`.
fn sort_key_prefix(prefix: &str) -> Cond {
    let mut cond = Cond::all().add(Expr::col(Records::SortKey).gte(prefix));
    if let Some(next) = key::prefix_successor(prefix) {
        cond = cond.add(Expr::col(Records::SortKey).lt(next));
    }
    cond
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::CorruptRecord(format!("bad timestamp {raw:?}: {e}")))
}

fn record_from_row(row: &SqliteRow) -> Result<Record> {
    let attributes: String = row.try_get("attributes")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: Option<String> = row.try_get("updated_at")?;

    Ok(Record {
        partition_key: row.try_get("partition_key")?,
        sort_key: row.try_get("sort_key")?,
        attributes: serde_json::from_str::<Attributes>(&attributes)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: updated_at.as_deref().map(parse_timestamp).transpose()?,
        expires_at: row.try_get("expires_at")?,
    })
}

/// Commit on success, roll back on failure.
async fn finish<T>(conn: &mut SqliteConnection, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(value)
        }
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(e)
        }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn put(&self, partition_key: &str, sort_key: &str, item: Item) -> Result<Record> {
        key::validate(partition_key, sort_key)?;

        let _gate = self.write_gate.lock().await;
        // BEGIN IMMEDIATE takes the write lock up front instead of upgrading
        // from a shared lock mid-transaction.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let now = self.clock.now();
        let result = Self::put_in(&mut conn, partition_key, sort_key, item, now).await;
        let record = finish(&mut conn, result).await?;

        debug!(partition_key = %partition_key, sort_key = %sort_key, "Record stored");
        Ok(record)
    }

    async fn get(&self, partition_key: &str, sort_key: &str) -> Result<Option<Record>> {
        key::validate(partition_key, sort_key)?;
        let mut conn = self.pool.acquire().await?;
        Self::live_record(&mut conn, partition_key, sort_key, self.clock.now_secs()).await
    }

    async fn query_by_partition(
        &self,
        partition_key: &str,
        sort_key_prefix: Option<&str>,
    ) -> Result<Vec<Record>> {
        key::validate_partition(partition_key)?;

        let query = Self::select_records()
            .and_where(Expr::col(Records::PartitionKey).eq(partition_key))
            .cond_where(self::sort_key_prefix(sort_key_prefix.unwrap_or("")))
            .cond_where(live(self.clock.now_secs()))
            .order_by(Records::SortKey, Order::Asc)
            .to_string(SqliteQueryBuilder);

        self.fetch_records(query).await
    }

    async fn query_by_sort_prefix(&self, sort_key_prefix: &str) -> Result<Vec<Record>> {
        let query = Self::select_records()
            .cond_where(self::sort_key_prefix(sort_key_prefix))
            .cond_where(live(self.clock.now_secs()))
            .order_by(Records::SortKey, Order::Asc)
            .order_by(Records::PartitionKey, Order::Asc)
            .to_string(SqliteQueryBuilder);

        self.fetch_records(query).await
    }

    async fn scan(&self) -> Result<Vec<Record>> {
        let query = Self::select_records()
            .cond_where(live(self.clock.now_secs()))
            .order_by(Records::PartitionKey, Order::Asc)
            .order_by(Records::SortKey, Order::Asc)
            .to_string(SqliteQueryBuilder);

        self.fetch_records(query).await
    }

    async fn patch(&self, partition_key: &str, sort_key: &str, patch: Patch) -> Result<Record> {
        key::validate(partition_key, sort_key)?;

        let _gate = self.write_gate.lock().await;
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let now = self.clock.now();
        let result = Self::patch_in(&mut conn, partition_key, sort_key, patch, now).await;
        finish(&mut conn, result).await
    }

    async fn delete(&self, partition_key: &str, sort_key: &str) -> Result<()> {
        key::validate(partition_key, sort_key)?;

        let query = Query::delete()
            .from_table(Records::Table)
            .and_where(Expr::col(Records::PartitionKey).eq(partition_key))
            .and_where(Expr::col(Records::SortKey).eq(sort_key))
            .to_string(SqliteQueryBuilder);

        let _gate = self.write_gate.lock().await;
        let result = sqlx::query(&query).execute(&self.pool).await?;

        debug!(
            partition_key = %partition_key,
            sort_key = %sort_key,
            removed = result.rows_affected() > 0,
            "Record deleted"
        );
        Ok(())
    }

    async fn expired_keys(&self, limit: usize) -> Result<Vec<StorageKey>> {
        let query = Query::select()
            .columns([Records::PartitionKey, Records::SortKey])
            .from(Records::Table)
            .and_where(Expr::col(Records::ExpiresAt).is_not_null())
            .and_where(Expr::col(Records::ExpiresAt).lte(self.clock.now_secs()))
            .order_by(Records::ExpiresAt, Order::Asc)
            // SQLite's LIMIT is a signed 64-bit integer.
            .limit(u64::try_from(limit).unwrap_or(u64::MAX).min(i64::MAX as u64))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let partition_key: String = row.try_get("partition_key")?;
                let sort_key: String = row.try_get("sort_key")?;
                key::encode(&partition_key, &sort_key)
            })
            .collect()
    }

    async fn reap(&self, partition_key: &str, sort_key: &str) -> Result<bool> {
        key::validate(partition_key, sort_key)?;

        let _gate = self.write_gate.lock().await;
        // The expiry check rides in the DELETE itself, so a record re-put
        // since it was listed survives.
        let query = Query::delete()
            .from_table(Records::Table)
            .and_where(Expr::col(Records::PartitionKey).eq(partition_key))
            .and_where(Expr::col(Records::SortKey).eq(sort_key))
            .and_where(Expr::col(Records::ExpiresAt).is_not_null())
            .and_where(Expr::col(Records::ExpiresAt).lte(self.clock.now_secs()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}
