//! Tabula - single-table composite-key record store
//!
//! Records are addressed by `(partition_key, sort_key)` and hold an open set
//! of scalar attributes. A secondary index over `(sort_key, partition_key)`
//! answers sort-key prefix queries across partitions, a background reaper
//! removes records whose `expiresAt` has passed, and partial updates go
//! through a validated update-expression builder.

pub mod config;
pub mod dispatch;
pub mod repository;
pub mod storage;
pub mod utils;
