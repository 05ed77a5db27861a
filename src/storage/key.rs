//! Composite key codec.
//!
//! A record is addressed by `(partition_key, sort_key)`. The store keys its
//! primary map by a single [`StorageKey`] string: the partition key, a NUL
//! separator, then the sort key. NUL sorts below every other character, so the
//! encoded keys order exactly like the `(partition_key, sort_key)` tuples and a
//! partition is one contiguous range.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use super::{Result, StorageError};

/// Separator between partition and sort key inside an encoded [`StorageKey`].
const KEY_SEPARATOR: char = '\0';

/// Separator between the tokens of an entity sort key.
pub const SORT_KEY_SEPARATOR: char = '#';

/// Encoded `(partition_key, sort_key)` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// Wrap an already-encoded key. Use [`decode`] to validate it.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.replace(KEY_SEPARATOR, "|"))
    }
}

/// Validate a key pair without encoding it.
pub fn validate(partition_key: &str, sort_key: &str) -> Result<()> {
    validate_partition(partition_key)?;
    if sort_key.is_empty() {
        return Err(StorageError::InvalidKey("sort key is empty".to_string()));
    }
    if sort_key.contains(KEY_SEPARATOR) {
        return Err(StorageError::InvalidKey(
            "sort key contains a NUL character".to_string(),
        ));
    }
    Ok(())
}

/// Validate a partition key on its own, as partition queries take one.
pub fn validate_partition(partition_key: &str) -> Result<()> {
    if partition_key.is_empty() {
        return Err(StorageError::InvalidKey("partition key is empty".to_string()));
    }
    if partition_key.contains(KEY_SEPARATOR) {
        return Err(StorageError::InvalidKey(
            "partition key contains a NUL character".to_string(),
        ));
    }
    Ok(())
}

/// Encode a key pair into a [`StorageKey`].
pub fn encode(partition_key: &str, sort_key: &str) -> Result<StorageKey> {
    validate(partition_key, sort_key)?;
    let mut raw = String::with_capacity(partition_key.len() + sort_key.len() + 1);
    raw.push_str(partition_key);
    raw.push(KEY_SEPARATOR);
    raw.push_str(sort_key);
    Ok(StorageKey(raw))
}

/// Decode a [`StorageKey`] back into `(partition_key, sort_key)`.
pub fn decode(key: &StorageKey) -> Result<(String, String)> {
    let (partition_key, sort_key) = key
        .0
        .split_once(KEY_SEPARATOR)
        .ok_or_else(|| StorageError::CorruptKey(key.to_string()))?;
    if partition_key.is_empty() || sort_key.is_empty() {
        return Err(StorageError::CorruptKey(key.to_string()));
    }
    Ok((partition_key.to_string(), sort_key.to_string()))
}

/// Half-open range `[start, end)` of encoded keys in `partition_key` whose
/// sort key starts with `sort_key_prefix`. `end` is None when unbounded.
pub fn partition_range(
    partition_key: &str,
    sort_key_prefix: &str,
) -> Result<(StorageKey, Option<StorageKey>)> {
    validate_partition(partition_key)?;
    let start = format!("{partition_key}{KEY_SEPARATOR}{sort_key_prefix}");
    let end = prefix_successor(&start).map(StorageKey);
    Ok((StorageKey(start), end))
}

/// Smallest string greater than every string that starts with `prefix`.
///
/// Returns None for the empty prefix (and for prefixes made only of
/// `char::MAX`), meaning the range is unbounded above.
pub fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = next_char(last) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

fn next_char(c: char) -> Option<char> {
    match c {
        char::MAX => None,
        // Skip the surrogate gap.
        '\u{D7FF}' => Some('\u{E000}'),
        _ => char::from_u32(c as u32 + 1),
    }
}

/// Build an entity sort key: `KIND#ts` or `KIND#subtype#ts`.
///
/// The timestamp is fixed-width RFC 3339 UTC with microseconds, so keys of the
/// same kind sort chronologically.
pub fn sort_key_for(kind: &str, subtype: Option<&str>, timestamp: DateTime<Utc>) -> Result<String> {
    validate_token("kind", kind)?;
    let ts = timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
    match subtype {
        Some(subtype) => {
            validate_token("subtype", subtype)?;
            Ok(format!(
                "{kind}{SORT_KEY_SEPARATOR}{subtype}{SORT_KEY_SEPARATOR}{ts}"
            ))
        }
        None => Ok(format!("{kind}{SORT_KEY_SEPARATOR}{ts}")),
    }
}

/// Prefix matching every sort key of `kind` (and `subtype`, if given).
pub fn sort_key_prefix(kind: &str, subtype: Option<&str>) -> Result<String> {
    validate_token("kind", kind)?;
    match subtype {
        Some(subtype) => {
            validate_token("subtype", subtype)?;
            Ok(format!(
                "{kind}{SORT_KEY_SEPARATOR}{subtype}{SORT_KEY_SEPARATOR}"
            ))
        }
        None => Ok(format!("{kind}{SORT_KEY_SEPARATOR}")),
    }
}

fn validate_token(what: &str, token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(StorageError::InvalidKey(format!("{what} is empty")));
    }
    if token.contains(SORT_KEY_SEPARATOR) || token.contains(KEY_SEPARATOR) {
        return Err(StorageError::InvalidKey(format!(
            "{what} {token:?} contains a reserved separator"
        )));
    }
    Ok(())
}
