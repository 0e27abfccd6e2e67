//! Query execution and the gated reader handed to request handlers.

use super::builder::{select_count, select_page};
use super::filter::EntityQuery;
use super::plan::plan;
use super::QueryError;
use crate::layout::{layout, RelationVia};
use crate::model::{
    CachedEntity, EntityAttrs, GalleryAttrs, GroupAttrs, ImageAttrs, PerformerAttrs, SceneAttrs,
    StudioAttrs, TagAttrs,
};
use crate::overlay::UserOverlay;
use crate::ready::ReadinessGate;
use crate::search::SearchHit;
use crate::ReplicaDb;
use mirror_ids::{make_ref, parse_ref, CompositeKey, EntityKind, RefError, UserId};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::FromRow;
use tracing::debug;

/// One result row: the cached entity merged with the requesting user's overlay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRow<A> {
    pub key: CompositeKey,
    #[serde(flatten)]
    pub entity: CachedEntity<A>,
    #[serde(flatten)]
    pub overlay: UserOverlay,
}

impl<'r, A> FromRow<'r, SqliteRow> for EntityRow<A>
where
    A: FromRow<'r, SqliteRow>,
{
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let entity = CachedEntity::<A>::from_row(row)?;
        Ok(Self {
            key: entity.key(),
            entity,
            overlay: UserOverlay::from_row(row)?,
        })
    }
}

/// A page of results plus the total across all pages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPage<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> QueryPage<T> {
    fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<QueryPage<U>, E> {
        Ok(QueryPage {
            items: self.items.into_iter().map(f).collect::<Result<_, _>>()?,
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        })
    }
}

fn to_values<A: EntityAttrs>(page: QueryPage<EntityRow<A>>) -> Result<QueryPage<Value>, QueryError> {
    page.try_map(|row| serde_json::to_value(row).map_err(|e| QueryError::Database(e.into())))
}

impl ReplicaDb {
    /// The only source id when the replica holds exactly one source.
    async fn default_source(&self) -> Result<Option<String>, QueryError> {
        let mut sources = self.list_sources().await?;
        if sources.len() == 1 {
            Ok(sources.pop().map(|source| source.id))
        } else {
            Ok(None)
        }
    }

    /// Run a query without consulting the readiness gate.
    pub async fn find_entities<A: EntityAttrs>(
        &self,
        user: &UserId,
        query: &EntityQuery,
    ) -> Result<QueryPage<EntityRow<A>>, QueryError> {
        if query.kind != A::KIND {
            return Err(QueryError::validation(format!(
                "query for {} cannot produce {} rows",
                query.kind,
                A::KIND
            )));
        }

        let default_source = if query.has_unscoped_keys() {
            self.default_source().await?
        } else {
            None
        };
        let plan = plan(query, default_source.as_deref())?;

        let mut page_query = select_page(&plan, user);
        let items = page_query
            .build_query_as::<EntityRow<A>>()
            .fetch_all(self.pool())
            .await?;

        let mut count_query = select_count(&plan, user);
        let total = count_query
            .build_query_scalar::<i64>()
            .fetch_one(self.pool())
            .await?;

        debug!(
            kind = %query.kind,
            returned = items.len(),
            total,
            page = plan.page,
            "Query executed"
        );

        Ok(QueryPage {
            items,
            total,
            page: plan.page,
            per_page: plan.per_page,
        })
    }

    /// Like [`find_entities`](Self::find_entities) with the row type chosen by
    /// `query.kind`, serialized to JSON.
    pub async fn find_values(
        &self,
        user: &UserId,
        query: &EntityQuery,
    ) -> Result<QueryPage<Value>, QueryError> {
        match query.kind {
            EntityKind::Scene => to_values(self.find_entities::<SceneAttrs>(user, query).await?),
            EntityKind::Performer => {
                to_values(self.find_entities::<PerformerAttrs>(user, query).await?)
            }
            EntityKind::Studio => to_values(self.find_entities::<StudioAttrs>(user, query).await?),
            EntityKind::Tag => to_values(self.find_entities::<TagAttrs>(user, query).await?),
            EntityKind::Group => to_values(self.find_entities::<GroupAttrs>(user, query).await?),
            EntityKind::Gallery => {
                to_values(self.find_entities::<GalleryAttrs>(user, query).await?)
            }
            EntityKind::Image => to_values(self.find_entities::<ImageAttrs>(user, query).await?),
        }
    }

    /// Composite keys of the live rows `key` links to through `relation`.
    ///
    /// Targets that were never synced or are soft-deleted are skipped. A
    /// missing or deleted owner yields an empty list.
    pub async fn related_keys(
        &self,
        kind: EntityKind,
        key: &str,
        relation: &str,
    ) -> Result<Vec<CompositeKey>, QueryError> {
        let owner_layout = layout(kind);
        let rel = owner_layout.relation(relation).ok_or_else(|| {
            QueryError::validation(format!("unknown relation '{relation}' for {kind}"))
        })?;

        let parts = parse_ref(key);
        let source_id = match parts.source_id {
            Some(source_id) => source_id,
            None => self
                .default_source()
                .await?
                .ok_or_else(|| RefError::MissingSource(key.to_string()))?,
        };

        let target = layout(rel.target).table;
        let sql = match rel.via {
            RelationVia::Junction { junction, reverse } => {
                let (_, owner_col, _, target_col) = junction.ends();
                let (self_col, other_col) = if reverse {
                    (target_col, owner_col)
                } else {
                    (owner_col, target_col)
                };
                let order = match junction.position_column() {
                    Some(col) if !reverse => format!("j.{col} IS NULL, j.{col}, "),
                    _ => String::new(),
                };
                format!(
                    r#"
                    SELECT t.id FROM {junction_table} j
                    JOIN {target} t ON t.source_id = j.source_id AND t.id = j.{other_col}
                    JOIN {owner} base ON base.source_id = j.source_id AND base.id = j.{self_col}
                    WHERE j.source_id = ? AND j.{self_col} = ?
                      AND t.deleted_at IS NULL AND base.deleted_at IS NULL
                    ORDER BY {order}t.id
                    "#,
                    junction_table = junction.table(),
                    owner = owner_layout.table,
                )
            }
            RelationVia::Column(col) => format!(
                r#"
                SELECT t.id FROM {owner} base
                JOIN {target} t ON t.source_id = base.source_id AND t.id = base.{col}
                WHERE base.source_id = ? AND base.id = ?
                  AND t.deleted_at IS NULL AND base.deleted_at IS NULL
                "#,
                owner = owner_layout.table,
            ),
        };

        let ids = sqlx::query_scalar::<_, String>(&sql)
            .bind(&source_id)
            .bind(&parts.id)
            .fetch_all(self.pool())
            .await?;
        Ok(ids.iter().map(|id| make_ref(id, &source_id)).collect())
    }
}

/// The replica as seen by request handlers: every read fails with
/// [`QueryError::NotReady`] until the initial full sync has completed.
#[derive(Clone)]
pub struct CatalogReader {
    db: ReplicaDb,
    gate: ReadinessGate,
}

impl CatalogReader {
    pub fn new(db: ReplicaDb, gate: ReadinessGate) -> Self {
        Self { db, gate }
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    pub fn db(&self) -> &ReplicaDb {
        &self.db
    }

    fn ensure_ready(&self) -> Result<(), QueryError> {
        if self.gate.is_ready() {
            Ok(())
        } else {
            Err(QueryError::NotReady)
        }
    }

    pub async fn find<A: EntityAttrs>(
        &self,
        user: &UserId,
        query: &EntityQuery,
    ) -> Result<QueryPage<EntityRow<A>>, QueryError> {
        self.ensure_ready()?;
        self.db.find_entities(user, query).await
    }

    pub async fn find_values(
        &self,
        user: &UserId,
        query: &EntityQuery,
    ) -> Result<QueryPage<Value>, QueryError> {
        self.ensure_ready()?;
        self.db.find_values(user, query).await
    }

    pub async fn related(
        &self,
        kind: EntityKind,
        key: &str,
        relation: &str,
    ) -> Result<Vec<CompositeKey>, QueryError> {
        self.ensure_ready()?;
        self.db.related_keys(kind, key, relation).await
    }

    pub async fn search(
        &self,
        kind: EntityKind,
        text: &str,
        limit: u32,
    ) -> Result<Vec<SearchHit>, QueryError> {
        self.ensure_ready()?;
        Ok(self.db.search(kind, text, limit).await?)
    }
}
