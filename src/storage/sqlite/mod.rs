//! SQLite implementation of RecordStore.

mod record_store;

pub use record_store::SqliteRecordStore;
