//! Composite `rawId:sourceId` keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Separator between the raw id and the owning source id.
const SEPARATOR: char = ':';

/// Identity errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefError {
    /// The key carries no source segment where one is required.
    #[error("composite key '{0}' is missing its source segment")]
    MissingSource(String),
}

/// The two halves of a composite key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefParts {
    pub id: String,
    /// `None` for legacy single-source keys that carry no separator.
    pub source_id: Option<String>,
}

/// A branded `rawId:sourceId` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeKey(String);

impl CompositeKey {
    /// Wrap an existing key string without validating it.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parts(&self) -> RefParts {
        parse_ref(&self.0)
    }

    pub fn raw_id(&self) -> &str {
        match self.0.split_once(SEPARATOR) {
            Some((id, _)) => id,
            None => &self.0,
        }
    }

    pub fn source_id(&self) -> Option<&str> {
        self.0.split_once(SEPARATOR).map(|(_, source)| source)
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CompositeKey> for String {
    fn from(key: CompositeKey) -> Self {
        key.0
    }
}

/// Build a composite key. Numeric ids are rendered through `Display`.
pub fn make_ref(raw_id: impl fmt::Display, source_id: impl AsRef<str>) -> CompositeKey {
    CompositeKey(format!("{}{}{}", raw_id, SEPARATOR, source_id.as_ref()))
}

/// Split a key on its first separator.
///
/// Source ids may themselves contain the separator, raw ids may not.
pub fn parse_ref(key: &str) -> RefParts {
    match key.split_once(SEPARATOR) {
        Some((id, source)) => RefParts {
            id: id.to_string(),
            source_id: Some(source.to_string()),
        },
        None => RefParts {
            id: key.to_string(),
            source_id: None,
        },
    }
}

/// Like [`parse_ref`], but a missing source segment is an error.
pub fn assert_ref(key: &str) -> Result<RefParts, RefError> {
    let parts = parse_ref(key);
    if parts.source_id.is_none() {
        return Err(RefError::MissingSource(key.to_string()));
    }
    Ok(parts)
}
