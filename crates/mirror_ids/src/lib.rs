//! Shared identifier wrappers for Catalog Mirror.
//!
//! Every cached entity is owned by exactly one upstream source, and raw ids are
//! only unique within that source. [`CompositeKey`] carries both halves so that
//! identically-numbered entities from different sources never collapse into one.

mod composite;
mod kind;

pub use composite::{assert_ref, make_ref, parse_ref, CompositeKey, RefError, RefParts};
pub use kind::{EntityKind, UnknownKindError};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Error returned when parsing a string-backed identifier fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

macro_rules! define_string_id {
    ($name:ident, $label:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                if value.trim().is_empty() {
                    return Err(IdParseError::new(format!("{} must not be empty", $label)));
                }
                Ok(Self(value.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(SourceId, "source ID");
define_string_id!(UserId, "user ID");

impl SourceId {
    /// Generate a fresh source id for a newly registered upstream.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_rejects_blank() {
        assert!(SourceId::parse("").is_err());
        assert!(SourceId::parse("   ").is_err());
        assert_eq!(SourceId::parse("main").unwrap().as_str(), "main");
    }

    #[test]
    fn test_generated_source_ids_are_distinct() {
        assert_ne!(SourceId::generate(), SourceId::generate());
    }

    #[test]
    fn test_user_id_serializes_transparently() {
        let user: UserId = "alice".parse().unwrap();
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"alice\"");
    }
}
