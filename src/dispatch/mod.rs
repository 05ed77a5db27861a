//! Request dispatcher.
//!
//! Maps an `operation` name plus a flat JSON payload to one store or entity
//! operation, and renders the outcome as a JSON response:
//!
//! ```text
//! {"operation":"put","partitionKey":"U1","sortKey":"PROFILE#1","name":"Ann"}
//! -> {"ok":true,"record":{"partitionKey":"U1","sortKey":"PROFILE#1",...}}
//! ```
//!
//! For `put` and the create helpers every field that is not a key or an
//! expiry control becomes an attribute. Expiry is controlled with
//! `expiresAt` (Unix seconds) or `ttlSeconds`, never both.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value as Json};
use tracing::{debug, warn};

use crate::repository::EntityRepository;
use crate::storage::{Attributes, Item, Patch, Record, RecordStore, StorageError};

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors returned to the caller of [`Dispatcher::dispatch`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
}

impl DispatchError {
    /// Stable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Storage(e) => e.kind(),
            DispatchError::MalformedRequest(_) => "MalformedRequest",
            DispatchError::UnknownOperation(_) => "UnknownOperation",
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(e: serde_json::Error) -> Self {
        DispatchError::MalformedRequest(e.to_string())
    }
}

/// Successful outcome of one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Record(Option<Record>),
    Records(Vec<Record>),
    Done,
}

impl Outcome {
    fn into_json(self) -> Json {
        match self {
            Outcome::Record(record) => json!({ "ok": true, "record": record }),
            Outcome::Records(records) => json!({ "ok": true, "records": records }),
            Outcome::Done => json!({ "ok": true }),
        }
    }
}

/// Operation name plus the remaining payload fields.
#[derive(Debug, Deserialize)]
struct Envelope {
    operation: String,
    #[serde(flatten)]
    payload: Map<String, Json>,
}

/// Expiry controls accepted by writes.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpiryFields {
    expires_at: Option<i64>,
    ttl_seconds: Option<u64>,
}

impl ExpiryFields {
    fn apply(self, item: Item) -> Result<Item> {
        match (self.expires_at, self.ttl_seconds) {
            (Some(_), Some(_)) => Err(DispatchError::MalformedRequest(
                "expiresAt and ttlSeconds are mutually exclusive".to_string(),
            )),
            (Some(at), None) => Ok(item.expires_at(at)),
            (None, Some(ttl)) => Ok(item.with_ttl(Duration::from_secs(ttl))),
            (None, None) => Ok(item),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyRequest {
    partition_key: String,
    sort_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutRequest {
    partition_key: String,
    sort_key: String,
    #[serde(flatten)]
    expiry: ExpiryFields,
    #[serde(flatten)]
    attributes: Attributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartitionQuery {
    partition_key: String,
    sort_key_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SortPrefixQuery {
    sort_key_prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatchRequest {
    partition_key: String,
    sort_key: String,
    #[serde(default)]
    set: Attributes,
    #[serde(default)]
    remove: Vec<String>,
    #[serde(flatten)]
    expiry: ExpiryFields,
    #[serde(default)]
    clear_expiry: bool,
}

impl PatchRequest {
    fn into_patch(self) -> Result<Patch> {
        let mut patch = Patch::new();
        for (name, value) in self.set {
            patch = patch.set(name, value);
        }
        for name in self.remove {
            patch = patch.remove(name);
        }

        patch = match (self.expiry.expires_at, self.expiry.ttl_seconds, self.clear_expiry) {
            (None, None, false) => patch,
            (None, None, true) => patch.clear_expiry(),
            (Some(at), None, false) => patch.expire_at(at),
            (None, Some(ttl), false) => patch.expire_after(Duration::from_secs(ttl)),
            _ => {
                return Err(DispatchError::MalformedRequest(
                    "only one of expiresAt, ttlSeconds and clearExpiry may be given".to_string(),
                ))
            }
        };
        Ok(patch)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    user_id: String,
    subtype: Option<String>,
    #[serde(flatten)]
    expiry: ExpiryFields,
    #[serde(flatten)]
    attributes: Attributes,
}

impl CreateRequest {
    fn subtype(&self, operation: &str) -> Result<&str> {
        self.subtype.as_deref().ok_or_else(|| {
            DispatchError::MalformedRequest(format!("{operation} requires a subtype"))
        })
    }

    fn item(&mut self) -> Result<Item> {
        let expiry = std::mem::take(&mut self.expiry);
        expiry.apply(Item::from_attributes(std::mem::take(&mut self.attributes)))
    }
}

fn parse<T: DeserializeOwned>(payload: Map<String, Json>) -> Result<T> {
    Ok(serde_json::from_value(Json::Object(payload))?)
}

/// Routes requests to a record store and its entity repository.
pub struct Dispatcher {
    store: Arc<dyn RecordStore>,
    entities: EntityRepository,
}

impl Dispatcher {
    pub fn new(entities: EntityRepository) -> Self {
        Self {
            store: entities.store().clone(),
            entities,
        }
    }

    /// Run one operation against the store.
    pub async fn dispatch(&self, operation: &str, payload: Map<String, Json>) -> Result<Outcome> {
        debug!(operation = %operation, "Dispatching request");

        match operation {
            "put" => {
                let request: PutRequest = parse(payload)?;
                let item = request
                    .expiry
                    .apply(Item::from_attributes(request.attributes))?;
                let record = self
                    .store
                    .put(&request.partition_key, &request.sort_key, item)
                    .await?;
                Ok(Outcome::Record(Some(record)))
            }
            "get" => {
                let request: KeyRequest = parse(payload)?;
                let record = self
                    .store
                    .get(&request.partition_key, &request.sort_key)
                    .await?;
                Ok(Outcome::Record(record))
            }
            "scan" => Ok(Outcome::Records(self.store.scan().await?)),
            "queryByPartition" => {
                let request: PartitionQuery = parse(payload)?;
                let records = self
                    .store
                    .query_by_partition(&request.partition_key, request.sort_key_prefix.as_deref())
                    .await?;
                Ok(Outcome::Records(records))
            }
            "queryBySortPrefix" => {
                let request: SortPrefixQuery = parse(payload)?;
                let records = self
                    .store
                    .query_by_sort_prefix(&request.sort_key_prefix)
                    .await?;
                Ok(Outcome::Records(records))
            }
            "patch" => {
                let request: PatchRequest = parse(payload)?;
                let partition_key = request.partition_key.clone();
                let sort_key = request.sort_key.clone();
                let record = self
                    .store
                    .patch(&partition_key, &sort_key, request.into_patch()?)
                    .await?;
                Ok(Outcome::Record(Some(record)))
            }
            "delete" => {
                let request: KeyRequest = parse(payload)?;
                self.store
                    .delete(&request.partition_key, &request.sort_key)
                    .await?;
                Ok(Outcome::Done)
            }
            "createProfile" => {
                let mut request: CreateRequest = parse(payload)?;
                if request.subtype.is_some() {
                    return Err(DispatchError::MalformedRequest(
                        "createProfile does not take a subtype".to_string(),
                    ));
                }
                let item = request.item()?;
                let record = self.entities.create_profile(&request.user_id, item).await?;
                Ok(Outcome::Record(Some(record)))
            }
            "createDetail" => {
                let mut request: CreateRequest = parse(payload)?;
                let item = request.item()?;
                let subtype = request.subtype(operation)?;
                let record = self
                    .entities
                    .create_detail(&request.user_id, subtype, item)
                    .await?;
                Ok(Outcome::Record(Some(record)))
            }
            "createActivity" => {
                let mut request: CreateRequest = parse(payload)?;
                let item = request.item()?;
                let subtype = request.subtype(operation)?;
                let record = self
                    .entities
                    .create_activity(&request.user_id, subtype, item)
                    .await?;
                Ok(Outcome::Record(Some(record)))
            }
            other => Err(DispatchError::UnknownOperation(other.to_string())),
        }
    }

    /// Handle one JSON request line and render the JSON response.
    pub async fn handle_json(&self, line: &str) -> String {
        let result = match serde_json::from_str::<Envelope>(line) {
            Ok(envelope) => {
                let operation = envelope.operation;
                self.dispatch(&operation, envelope.payload)
                    .await
                    .inspect_err(|e| {
                        warn!(operation = %operation, kind = e.kind(), error = %e, "Request failed")
                    })
            }
            Err(e) => {
                warn!(error = %e, "Unreadable request");
                Err(DispatchError::from(e))
            }
        };

        let response = match result {
            Ok(outcome) => outcome.into_json(),
            Err(e) => json!({
                "ok": false,
                "error": { "kind": e.kind(), "message": e.to_string() },
            }),
        };
        response.to_string()
    }
}
