//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Records table schema.
#[derive(Iden)]
pub enum Records {
    Table,
    #[iden = "partition_key"]
    PartitionKey,
    #[iden = "sort_key"]
    SortKey,
    #[iden = "attributes"]
    Attributes,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
    #[iden = "expires_at"]
    ExpiresAt,
}

/// SQL for creating the records table.
pub const CREATE_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    partition_key TEXT NOT NULL,
    sort_key TEXT NOT NULL,
    attributes TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT,
    expires_at INTEGER,
    PRIMARY KEY (partition_key, sort_key)
)
"#;

/// Secondary index: cross-partition lookups by sort key.
pub const CREATE_SORT_KEY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_records_sort_key ON records(sort_key, partition_key)
"#;

/// Partial index over records carrying a TTL, for the reaper.
pub const CREATE_EXPIRES_AT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_records_expires_at ON records(expires_at)
    WHERE expires_at IS NOT NULL
"#;
