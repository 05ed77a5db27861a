//! Record model.
//!
//! A record is an open attribute map plus a fixed set of reserved attributes
//! that the store owns. Reserved attributes are typed fields on [`Record`]
//! and may not appear in the open map.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Result, StorageError};

/// Attribute name of the partition key.
pub const PARTITION_KEY: &str = "partitionKey";
/// Attribute name of the sort key.
pub const SORT_KEY: &str = "sortKey";
/// Attribute name of the creation timestamp.
pub const CREATED_AT: &str = "createdAt";
/// Attribute name of the last-patch timestamp.
pub const UPDATED_AT: &str = "updatedAt";
/// TTL attribute name (Unix seconds).
pub const EXPIRES_AT: &str = "expiresAt";

/// Attribute names the store manages itself.
pub const RESERVED_ATTRIBUTES: [&str; 5] =
    [PARTITION_KEY, SORT_KEY, CREATED_AT, UPDATED_AT, EXPIRES_AT];

/// Whether `name` is one of [`RESERVED_ATTRIBUTES`].
pub fn is_reserved(name: &str) -> bool {
    RESERVED_ATTRIBUTES.contains(&name)
}

/// Scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Open attribute map. Ordered so records serialize deterministically.
pub type Attributes = BTreeMap<String, Value>;

/// Reject any reserved attribute name in an open attribute map.
pub fn check_unreserved<'a>(names: impl IntoIterator<Item = &'a String>) -> Result<()> {
    for name in names {
        if is_reserved(name) {
            return Err(StorageError::ReservedField(name.clone()));
        }
    }
    Ok(())
}

/// Reject NaN and infinite numbers, which have no JSON or SQLite form.
pub fn check_finite<'a>(attributes: impl IntoIterator<Item = (&'a String, &'a Value)>) -> Result<()> {
    for (name, value) in attributes {
        if let Value::Number(n) = value {
            if !n.is_finite() {
                return Err(StorageError::InvalidValue(name.clone()));
            }
        }
    }
    Ok(())
}

/// A stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub partition_key: String,
    pub sort_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Unix seconds after which the record is logically deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl Record {
    /// Whether the record is expired at `now_secs`.
    pub fn is_expired(&self, now_secs: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_secs)
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// When a record expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// `now + ttl`, evaluated by the store when the write is applied.
    After(Duration),
    /// Absolute Unix seconds. Must be positive.
    At(i64),
}

impl Expiry {
    /// Resolve to absolute Unix seconds against `now_secs`.
    pub fn resolve(self, now_secs: i64) -> Result<i64> {
        let at = match self {
            Expiry::After(ttl) => {
                let ttl = i64::try_from(ttl.as_secs()).map_err(|_| {
                    StorageError::InvalidExpiry(i64::MAX)
                })?;
                now_secs.saturating_add(ttl)
            }
            Expiry::At(at) => at,
        };
        if at <= 0 {
            return Err(StorageError::InvalidExpiry(at));
        }
        Ok(at)
    }
}

/// Input for `put`: the open attributes plus an optional expiry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    pub attributes: Attributes,
    pub expiry: Option<Expiry>,
}

impl Item {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_attributes(attributes: Attributes) -> Self {
        Self {
            attributes,
            expiry: None,
        }
    }

    /// Set one attribute.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Expire `ttl` after the write is applied.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expiry = Some(Expiry::After(ttl));
        self
    }

    /// Expire at absolute Unix seconds.
    pub fn expires_at(mut self, at: i64) -> Self {
        self.expiry = Some(Expiry::At(at));
        self
    }

    /// Validate and turn into a stored record.
    ///
    /// `created_at` is the timestamp of the record being replaced, if any.
    pub(crate) fn into_record(
        self,
        partition_key: &str,
        sort_key: &str,
        now: DateTime<Utc>,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<Record> {
        check_unreserved(self.attributes.keys())?;
        check_finite(&self.attributes)?;
        let expires_at = self
            .expiry
            .map(|expiry| expiry.resolve(now.timestamp()))
            .transpose()?;
        Ok(Record {
            partition_key: partition_key.to_string(),
            sort_key: sort_key.to_string(),
            created_at: created_at.unwrap_or(now),
            updated_at: None,
            expires_at,
            attributes: self.attributes,
        })
    }
}
