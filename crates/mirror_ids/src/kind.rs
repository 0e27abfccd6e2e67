//! Entity kinds mirrored from upstream catalogs.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown entity kind: {0}")]
pub struct UnknownKindError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Scene,
    Performer,
    Studio,
    Tag,
    Group,
    Gallery,
    Image,
}

impl EntityKind {
    /// All kinds, referenced kinds first.
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Tag,
        EntityKind::Studio,
        EntityKind::Performer,
        EntityKind::Group,
        EntityKind::Gallery,
        EntityKind::Scene,
        EntityKind::Image,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scene => "scene",
            Self::Performer => "performer",
            Self::Studio => "studio",
            Self::Tag => "tag",
            Self::Group => "group",
            Self::Gallery => "gallery",
            Self::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownKindError> {
        match s.trim().to_lowercase().as_str() {
            "scene" | "scenes" => Ok(Self::Scene),
            "performer" | "performers" => Ok(Self::Performer),
            "studio" | "studios" => Ok(Self::Studio),
            "tag" | "tags" => Ok(Self::Tag),
            "group" | "groups" | "movie" | "movies" => Ok(Self::Group),
            "gallery" | "galleries" => Ok(Self::Gallery),
            "image" | "images" => Ok(Self::Image),
            other => Err(UnknownKindError(other.to_string())),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = UnknownKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_plurals_and_legacy_names() {
        assert_eq!(EntityKind::parse("Scenes").unwrap(), EntityKind::Scene);
        assert_eq!(EntityKind::parse("movie").unwrap(), EntityKind::Group);
        assert!(EntityKind::parse("marker").is_err());
    }

    #[test]
    fn test_as_str_round_trips() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()).unwrap(), kind);
        }
    }
}
