//! Update-expression builder.
//!
//! A [`Patch`] is a sparse change request: fields to set, fields to remove,
//! and optionally a new expiry. [`Patch::build`] validates it and produces an
//! [`UpdateExpression`], an ordered list of actions that cannot fail once
//! built. The store applies the expression to a record inside its write
//! section, so a patch either fully applies or leaves the record untouched.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::record::{
    check_finite, is_reserved, Attributes, Expiry, Record, Value, EXPIRES_AT, UPDATED_AT,
};
use super::{Result, StorageError};

/// Change to a record's expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryUpdate {
    Set(Expiry),
    Clear,
}

/// Sparse update request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub set: Attributes,
    pub remove: BTreeSet<String>,
    pub expiry: Option<ExpiryUpdate>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(name.into(), value.into());
        self
    }

    pub fn remove(mut self, name: impl Into<String>) -> Self {
        self.remove.insert(name.into());
        self
    }

    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expiry = Some(ExpiryUpdate::Set(Expiry::After(ttl)));
        self
    }

    pub fn expire_at(mut self, at: i64) -> Self {
        self.expiry = Some(ExpiryUpdate::Set(Expiry::At(at)));
        self
    }

    pub fn clear_expiry(mut self) -> Self {
        self.expiry = Some(ExpiryUpdate::Clear);
        self
    }

    /// Validate and compile into an [`UpdateExpression`] stamped with `now`.
    ///
    /// Checks, in order: reserved fields, set/remove overlap, emptiness of the
    /// caller-supplied changes, expiry validity.
    pub fn build(self, now: DateTime<Utc>) -> Result<UpdateExpression> {
        if let Some(name) = self
            .set
            .keys()
            .chain(self.remove.iter())
            .find(|name| is_reserved(name))
        {
            return Err(StorageError::ReservedField(name.clone()));
        }

        if let Some(name) = self.remove.iter().find(|name| self.set.contains_key(*name)) {
            return Err(StorageError::ConflictingFieldOp(name.clone()));
        }

        check_finite(&self.set)?;

        if self.set.is_empty() && self.remove.is_empty() && self.expiry.is_none() {
            return Err(StorageError::EmptyPatch);
        }

        let mut actions = Vec::with_capacity(self.remove.len() + self.set.len() + 2);
        actions.extend(self.remove.into_iter().map(UpdateAction::Remove));
        actions.extend(
            self.set
                .into_iter()
                .map(|(name, value)| UpdateAction::Set(name, value)),
        );
        match self.expiry {
            Some(ExpiryUpdate::Set(expiry)) => {
                let at = expiry.resolve(now.timestamp())?;
                actions.push(UpdateAction::SetExpiry(Some(at)));
            }
            Some(ExpiryUpdate::Clear) => actions.push(UpdateAction::SetExpiry(None)),
            None => {}
        }
        actions.push(UpdateAction::Touch(now));

        Ok(UpdateExpression { actions })
    }
}

/// One step of an [`UpdateExpression`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    Remove(String),
    Set(String, Value),
    SetExpiry(Option<i64>),
    /// Implicit `updatedAt = now`.
    Touch(DateTime<Utc>),
}

/// Validated, ordered list of actions: removes, then sets, then the reserved
/// expiry and `updatedAt` writes.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateExpression {
    actions: Vec<UpdateAction>,
}

impl UpdateExpression {
    pub fn actions(&self) -> &[UpdateAction] {
        &self.actions
    }

    /// Apply every action to `record`. Infallible: all checks ran in `build`.
    pub fn apply(&self, record: &mut Record) {
        for action in &self.actions {
            match action {
                UpdateAction::Remove(name) => {
                    record.attributes.remove(name);
                }
                UpdateAction::Set(name, value) => {
                    record.attributes.insert(name.clone(), value.clone());
                }
                UpdateAction::SetExpiry(at) => record.expires_at = *at,
                UpdateAction::Touch(now) => record.updated_at = Some(*now),
            }
        }
    }
}

impl fmt::Display for UpdateExpression {
    /// Renders like `REMOVE a, b SET c = :c, updatedAt = :updatedAt`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut removes = Vec::new();
        let mut sets = Vec::new();
        for action in &self.actions {
            match action {
                UpdateAction::Remove(name) => removes.push(name.as_str()),
                UpdateAction::Set(name, _) => sets.push(name.as_str()),
                UpdateAction::SetExpiry(None) => removes.push(EXPIRES_AT),
                UpdateAction::SetExpiry(Some(_)) => sets.push(EXPIRES_AT),
                UpdateAction::Touch(_) => sets.push(UPDATED_AT),
            }
        }
        if !removes.is_empty() {
            write!(f, "REMOVE {}", removes.join(", "))?;
        }
        if !sets.is_empty() {
            if !removes.is_empty() {
                f.write_str(" ")?;
            }
            let assignments: Vec<String> =
                sets.iter().map(|name| format!("{name} = :{name}")).collect();
            write!(f, "SET {}", assignments.join(", "))?;
        }
        Ok(())
    }
}
