//! Entity repository.
//!
//! Profiles, details and activities of a user share one partition (the user
//! id). Their sort keys are `KIND#ts` or `KIND#subtype#ts`, so a partition
//! query with a kind prefix returns one kind in creation order, and a sort-key
//! prefix query finds one kind across every user.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::storage::key;
use crate::storage::{Item, Record, RecordStore, Result};
use crate::utils::clock::Clock;

/// Entity kinds stored in the table, by sort-key token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Profile,
    Detail,
    Activity,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Profile => "PROFILE",
            EntityKind::Detail => "DETAIL",
            EntityKind::Activity => "ACTIVITY",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository for user entities.
///
/// Synthesizes sort keys from the entity kind and the clock, and answers the
/// per-user and per-kind access patterns.
pub struct EntityRepository {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    /// Applied to activities created without an explicit expiry.
    activity_ttl: Option<Duration>,
}

impl EntityRepository {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            activity_ttl: None,
        }
    }

    /// Create a repository whose activities expire after `activity_ttl` by default.
    pub fn with_activity_ttl(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        activity_ttl: Option<Duration>,
    ) -> Self {
        Self {
            store,
            clock,
            activity_ttl,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub async fn create_profile(&self, user_id: &str, item: Item) -> Result<Record> {
        self.create(user_id, EntityKind::Profile, None, item).await
    }

    pub async fn create_detail(&self, user_id: &str, subtype: &str, item: Item) -> Result<Record> {
        self.create(user_id, EntityKind::Detail, Some(subtype), item)
            .await
    }

    /// Create an activity. Takes the default activity TTL unless `item`
    /// carries its own expiry.
    pub async fn create_activity(
        &self,
        user_id: &str,
        subtype: &str,
        mut item: Item,
    ) -> Result<Record> {
        if item.expiry.is_none() {
            if let Some(ttl) = self.activity_ttl {
                item = item.with_ttl(ttl);
            }
        }
        self.create(user_id, EntityKind::Activity, Some(subtype), item)
            .await
    }

    async fn create(
        &self,
        user_id: &str,
        kind: EntityKind,
        subtype: Option<&str>,
        item: Item,
    ) -> Result<Record> {
        let sort_key = key::sort_key_for(kind.as_str(), subtype, self.clock.now())?;
        let record = self.store.put(user_id, &sort_key, item).await?;

        debug!(
            user_id = %user_id,
            kind = %kind,
            sort_key = %record.sort_key,
            "Entity created"
        );
        Ok(record)
    }

    /// Latest profile of a user.
    pub async fn profile(&self, user_id: &str) -> Result<Option<Record>> {
        let mut profiles = self.of_kind(user_id, EntityKind::Profile, None).await?;
        Ok(profiles.pop())
    }

    /// Details of a user, oldest first, optionally of one subtype.
    pub async fn details(&self, user_id: &str, subtype: Option<&str>) -> Result<Vec<Record>> {
        self.of_kind(user_id, EntityKind::Detail, subtype).await
    }

    /// Activities of a user, oldest first, optionally of one subtype.
    pub async fn activities(&self, user_id: &str, subtype: Option<&str>) -> Result<Vec<Record>> {
        self.of_kind(user_id, EntityKind::Activity, subtype).await
    }

    /// Every live entity of `kind` across all users, ordered by sort key.
    pub async fn all_of_kind(&self, kind: EntityKind) -> Result<Vec<Record>> {
        let prefix = key::sort_key_prefix(kind.as_str(), None)?;
        self.store.query_by_sort_prefix(&prefix).await
    }

    /// Every live item of a user, ordered by sort key.
    pub async fn user_items(&self, user_id: &str) -> Result<Vec<Record>> {
        self.store.query_by_partition(user_id, None).await
    }

    async fn of_kind(
        &self,
        user_id: &str,
        kind: EntityKind,
        subtype: Option<&str>,
    ) -> Result<Vec<Record>> {
        let prefix = key::sort_key_prefix(kind.as_str(), subtype)?;
        self.store.query_by_partition(user_id, Some(&prefix)).await
    }
}
