//! Query request types, deserializable straight from an HTTP body.

use mirror_ids::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_PER_PAGE: u32 = 25;
pub const MAX_PER_PAGE: u32 = 1000;

/// Sort name for full-text rank. Only valid together with `q`.
pub const RELEVANCE_SORT: &str = "relevance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modifier {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Between,
    NotBetween,
    IsNull,
    NotNull,
    Includes,
    Excludes,
    IncludesAll,
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Paging, sorting and free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindFilter {
    pub q: Option<String>,
    /// 1-based.
    pub page: u32,
    pub per_page: u32,
    pub sort: Option<String>,
    pub direction: SortDirection,
}

impl Default for FindFilter {
    fn default() -> Self {
        Self {
            q: None,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            sort: None,
            direction: SortDirection::Asc,
        }
    }
}

/// One filter condition. All criteria of a query are AND-ed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Criterion {
    /// Condition on a mirrored column or a `user_*` overlay field.
    Column {
        field: String,
        modifier: Modifier,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        value2: Value,
    },
    /// Inclusion or exclusion by related composite keys.
    Related {
        relation: String,
        modifier: Modifier,
        #[serde(default)]
        keys: Vec<String>,
    },
    /// The requesting user's favorite flag.
    Favorite { favorite: bool },
}

impl Criterion {
    pub fn column(field: impl Into<String>, modifier: Modifier, value: impl Into<Value>) -> Self {
        Self::Column {
            field: field.into(),
            modifier,
            value: value.into(),
            value2: Value::Null,
        }
    }

    pub fn between(field: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::Column {
            field: field.into(),
            modifier: Modifier::Between,
            value: low.into(),
            value2: high.into(),
        }
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::column(field, Modifier::IsNull, Value::Null)
    }

    pub fn related<K: Into<String>>(
        relation: impl Into<String>,
        modifier: Modifier,
        keys: impl IntoIterator<Item = K>,
    ) -> Self {
        Self::Related {
            relation: relation.into(),
            modifier,
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn favorite(favorite: bool) -> Self {
        Self::Favorite { favorite }
    }
}

/// A complete read request for one entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityQuery {
    pub kind: EntityKind,
    #[serde(default)]
    pub find: FindFilter,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    /// Restrict to these source ids. Empty means every source in the replica.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl EntityQuery {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            find: FindFilter::default(),
            criteria: Vec::new(),
            sources: Vec::new(),
            include_deleted: false,
        }
    }

    pub fn text(mut self, q: impl Into<String>) -> Self {
        self.find.q = Some(q.into());
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.find.sort = Some(field.into());
        self.find.direction = direction;
        self
    }

    pub fn page(mut self, page: u32, per_page: u32) -> Self {
        self.find.page = page;
        self.find.per_page = per_page;
        self
    }

    pub fn filter(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    pub fn source(mut self, source_id: impl Into<String>) -> Self {
        self.sources.push(source_id.into());
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// True when some related key relies on the single-source fallback.
    pub(crate) fn has_unscoped_keys(&self) -> bool {
        self.criteria.iter().any(|criterion| match criterion {
            Criterion::Related { keys, .. } => keys.iter().any(|key| !key.contains(':')),
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_full_request() {
        let query: EntityQuery = serde_json::from_value(json!({
            "kind": "scene",
            "find": { "q": "beach", "per_page": 10, "sort": "user_rating", "direction": "DESC" },
            "criteria": [
                { "type": "column", "field": "rating100", "modifier": "GREATER_THAN", "value": 60 },
                { "type": "related", "relation": "performers", "modifier": "INCLUDES_ALL", "keys": ["1:A", "2:A"] },
                { "type": "favorite", "favorite": true }
            ]
        }))
        .unwrap();

        assert_eq!(query.kind, EntityKind::Scene);
        assert_eq!(query.find.page, 1);
        assert_eq!(query.find.per_page, 10);
        assert_eq!(query.find.direction, SortDirection::Desc);
        assert_eq!(query.criteria.len(), 3);
        assert_eq!(
            query.criteria[0],
            Criterion::column("rating100", Modifier::GreaterThan, 60)
        );
        assert!(!query.include_deleted);
        assert!(!query.has_unscoped_keys());
    }

    #[test]
    fn test_minimal_request_uses_defaults() {
        let query: EntityQuery = serde_json::from_value(json!({ "kind": "tag" })).unwrap();
        assert_eq!(query.find, FindFilter::default());
        assert!(query.criteria.is_empty());
    }

    #[test]
    fn test_unscoped_keys_detected() {
        let query = EntityQuery::new(EntityKind::Scene)
            .filter(Criterion::related("tags", Modifier::Includes, ["7"]));
        assert!(query.has_unscoped_keys());
    }
}
