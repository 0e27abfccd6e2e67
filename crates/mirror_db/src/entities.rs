//! Entity writes: upsert with edge replacement, soft delete, purge.

use crate::error::Result;
use crate::layout::{layout, Junction};
use crate::model::{with_record, CachedEntity, CatalogRecord, EdgeSet, EntityAttrs, EntityRecord};
use crate::ReplicaDb;
use mirror_ids::EntityKind;
use sqlx::{QueryBuilder, Sqlite, Transaction};
use std::collections::HashSet;
use tracing::debug;

impl ReplicaDb {
    // ========================================================================
    // Upserts
    // ========================================================================

    /// Insert or overwrite one entity and replace its edge sets, atomically.
    ///
    /// A previously soft-deleted row is revived in place.
    pub async fn upsert_record(
        &self,
        source_id: &str,
        record: &CatalogRecord,
        synced_at: i64,
    ) -> Result<()> {
        with_record!(record, inner => self.upsert_entity(source_id, inner, synced_at).await)
    }

    pub async fn upsert_entity<A: EntityAttrs>(
        &self,
        source_id: &str,
        record: &EntityRecord<A>,
        synced_at: i64,
    ) -> Result<()> {
        let layout = layout(A::KIND);
        let mut tx = self.pool.begin().await?;

        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "INSERT INTO {} (id, source_id, {}, source_created_at, source_updated_at, synced_at, deleted_at) ",
            layout.table,
            column_list(A::COLUMNS.iter().map(|c| c.name)),
        ));
        qb.push("VALUES (");
        {
            let mut values = qb.separated(", ");
            values.push_bind(record.id.clone());
            values.push_bind(source_id.to_string());
            record.attrs.push_values(&mut values);
            values.push_bind(record.created_at);
            values.push_bind(record.updated_at);
            values.push_bind(synced_at);
            values.push_bind(None::<i64>);
        }
        qb.push(") ON CONFLICT (source_id, id) DO UPDATE SET ");
        for col in A::COLUMNS {
            qb.push(format!("{0} = excluded.{0}, ", col.name));
        }
        qb.push(
            "source_created_at = excluded.source_created_at, \
             source_updated_at = excluded.source_updated_at, \
             synced_at = excluded.synced_at, \
             deleted_at = NULL",
        );
        qb.build().execute(&mut *tx).await?;

        for junction in layout.owned_junctions() {
            let edges = record.edges.iter().find(|set| set.junction == junction);
            replace_edges(&mut tx, source_id, junction, &record.id, edges).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Soft-delete every live row of `(source, kind)` not written since `pass_start`.
    ///
    /// Returns the number of rows marked.
    pub async fn mark_unseen_deleted(
        &self,
        source_id: &str,
        kind: EntityKind,
        pass_start: i64,
    ) -> Result<u64> {
        let sql = format!(
            "UPDATE {} SET deleted_at = ? WHERE source_id = ? AND deleted_at IS NULL AND synced_at < ?",
            layout(kind).table
        );
        let result = sqlx::query(&sql)
            .bind(Self::sync_stamp())
            .bind(source_id)
            .bind(pass_start)
            .execute(&self.pool)
            .await?;

        debug!(source = source_id, kind = %kind, count = result.rows_affected(), "Soft-deleted unseen rows");
        Ok(result.rows_affected())
    }

    /// Hard-delete every cached row and edge owned by a source.
    ///
    /// Overlay rows are user data and are left alone.
    pub async fn purge_source_entities(&self, source_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for junction in Junction::ALL {
            let sql = format!("DELETE FROM {} WHERE source_id = ?", junction.table());
            sqlx::query(&sql).bind(source_id).execute(&mut *tx).await?;
        }
        for kind in EntityKind::ALL {
            let sql = format!("DELETE FROM {} WHERE source_id = ?", layout(kind).table);
            let result = sqlx::query(&sql).bind(source_id).execute(&mut *tx).await?;
            removed += result.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Fetch one cached row regardless of its deletion state.
    pub async fn get_entity<A: EntityAttrs>(
        &self,
        source_id: &str,
        id: &str,
    ) -> Result<Option<CachedEntity<A>>> {
        let layout = layout(A::KIND);
        let sql = format!(
            "SELECT * FROM {} WHERE source_id = ? AND id = ?",
            layout.table
        );
        let entity = sqlx::query_as::<_, CachedEntity<A>>(&sql)
            .bind(source_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entity)
    }

    /// Count non-deleted rows, optionally for one source.
    pub async fn count_live(&self, kind: EntityKind, source_id: Option<&str>) -> Result<i64> {
        let table = layout(kind).table;
        let count = match source_id {
            Some(source_id) => {
                let sql = format!(
                    "SELECT COUNT(*) FROM {table} WHERE deleted_at IS NULL AND source_id = ?"
                );
                sqlx::query_scalar::<_, i64>(&sql)
                    .bind(source_id)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("SELECT COUNT(*) FROM {table} WHERE deleted_at IS NULL");
                sqlx::query_scalar::<_, i64>(&sql)
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    /// Raw ids of the targets an entity links to through one junction, in
    /// stored order.
    pub async fn edge_targets(
        &self,
        source_id: &str,
        junction: Junction,
        owner_id: &str,
    ) -> Result<Vec<String>> {
        let (_, owner_col, _, target_col) = junction.ends();
        let order = junction
            .position_column()
            .map(|col| format!("{col} IS NULL, {col}, "))
            .unwrap_or_default();
        let sql = format!(
            "SELECT {target_col} FROM {table} WHERE source_id = ? AND {owner_col} = ? ORDER BY {order}{target_col}",
            table = junction.table()
        );
        let ids = sqlx::query_scalar::<_, String>(&sql)
            .bind(source_id)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}

fn column_list<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}

/// Delete-then-insert the edge set of one owner inside the caller's transaction.
async fn replace_edges(
    tx: &mut Transaction<'_, Sqlite>,
    source_id: &str,
    junction: Junction,
    owner_id: &str,
    edges: Option<&EdgeSet>,
) -> Result<()> {
    let (_, owner_col, _, target_col) = junction.ends();
    let table = junction.table();

    let delete = format!("DELETE FROM {table} WHERE source_id = ? AND {owner_col} = ?");
    sqlx::query(&delete)
        .bind(source_id)
        .bind(owner_id)
        .execute(&mut **tx)
        .await?;

    let Some(edges) = edges else {
        return Ok(());
    };

    // Upstream lists occasionally repeat an id; keep the first occurrence.
    let mut seen = HashSet::new();
    let targets: Vec<_> = edges
        .targets
        .iter()
        .filter(|target| seen.insert(target.id.as_str()))
        .collect();
    if targets.is_empty() {
        return Ok(());
    }

    let mut qb: QueryBuilder<'_, Sqlite> = match junction.position_column() {
        Some(position_col) => QueryBuilder::new(format!(
            "INSERT INTO {table} (source_id, {owner_col}, {target_col}, {position_col}) "
        )),
        None => QueryBuilder::new(format!(
            "INSERT INTO {table} (source_id, {owner_col}, {target_col}) "
        )),
    };
    let with_position = junction.position_column().is_some();
    qb.push_values(targets, |mut row, target| {
        row.push_bind(source_id.to_string())
            .push_bind(owner_id.to_string())
            .push_bind(target.id.clone());
        if with_position {
            row.push_bind(target.position);
        }
    });
    qb.build().execute(&mut **tx).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityRecord, PerformerAttrs, SceneAttrs};
    use tempfile::TempDir;

    async fn test_db() -> (TempDir, ReplicaDb) {
        let tmp = TempDir::new().unwrap();
        let db = ReplicaDb::open(tmp.path().join("entities.db")).await.unwrap();
        (tmp, db)
    }

    fn scene(id: &str, title: &str) -> EntityRecord<SceneAttrs> {
        EntityRecord::new(
            id,
            SceneAttrs {
                title: Some(title.to_string()),
                rating100: Some(80),
                ..Default::default()
            },
        )
        .updated_at(1_000)
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_overwrites() {
        let (_tmp, db) = test_db().await;

        db.upsert_entity("A", &scene("1", "First"), ReplicaDb::sync_stamp())
            .await
            .unwrap();
        db.upsert_entity("A", &scene("1", "Renamed"), ReplicaDb::sync_stamp())
            .await
            .unwrap();

        let row = db.get_entity::<SceneAttrs>("A", "1").await.unwrap().unwrap();
        assert_eq!(row.attrs.title.as_deref(), Some("Renamed"));
        assert_eq!(row.attrs.rating100, Some(80));
        assert_eq!(row.source_updated_at, Some(1_000));
        assert_eq!(db.count_live(EntityKind::Scene, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_edges_are_replaced_wholesale() {
        let (_tmp, db) = test_db().await;

        let first = scene("1", "Edges").with_edges(EdgeSet::new(
            Junction::ScenePerformers,
            vec!["p1".to_string(), "p2".to_string(), "p1".to_string()],
        ));
        db.upsert_entity("A", &first, ReplicaDb::sync_stamp()).await.unwrap();
        assert_eq!(
            db.edge_targets("A", Junction::ScenePerformers, "1").await.unwrap(),
            vec!["p1", "p2"]
        );

        let second = scene("1", "Edges")
            .with_edges(EdgeSet::new(Junction::ScenePerformers, vec!["p3".to_string()]));
        db.upsert_entity("A", &second, ReplicaDb::sync_stamp()).await.unwrap();
        assert_eq!(
            db.edge_targets("A", Junction::ScenePerformers, "1").await.unwrap(),
            vec!["p3"]
        );

        // A record without any edge set for a junction clears it.
        db.upsert_entity("A", &scene("1", "Edges"), ReplicaDb::sync_stamp())
            .await
            .unwrap();
        assert!(db
            .edge_targets("A", Junction::ScenePerformers, "1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_group_edges_keep_scene_index_order() {
        let (_tmp, db) = test_db().await;
        let record = scene("1", "Ordered").with_edges(EdgeSet::ordered(
            Junction::SceneGroups,
            vec![("g2".to_string(), Some(2)), ("g1".to_string(), Some(1))],
        ));
        db.upsert_entity("A", &record, ReplicaDb::sync_stamp()).await.unwrap();
        assert_eq!(
            db.edge_targets("A", Junction::SceneGroups, "1").await.unwrap(),
            vec!["g1", "g2"]
        );
    }

    #[tokio::test]
    async fn test_mark_unseen_deleted_and_revive() {
        let (_tmp, db) = test_db().await;

        for id in ["1", "2", "3"] {
            db.upsert_entity("A", &scene(id, "x"), ReplicaDb::sync_stamp())
                .await
                .unwrap();
        }
        let pass_start = ReplicaDb::sync_stamp();
        for id in ["1", "3"] {
            db.upsert_entity("A", &scene(id, "x"), ReplicaDb::sync_stamp())
                .await
                .unwrap();
        }

        let marked = db
            .mark_unseen_deleted("A", EntityKind::Scene, pass_start)
            .await
            .unwrap();
        assert_eq!(marked, 1);
        let two = db.get_entity::<SceneAttrs>("A", "2").await.unwrap().unwrap();
        assert!(two.is_deleted());
        assert_eq!(db.count_live(EntityKind::Scene, Some("A")).await.unwrap(), 2);

        db.upsert_entity("A", &scene("2", "back"), ReplicaDb::sync_stamp())
            .await
            .unwrap();
        let two = db.get_entity::<SceneAttrs>("A", "2").await.unwrap().unwrap();
        assert!(!two.is_deleted());
    }

    #[tokio::test]
    async fn test_soft_delete_is_scoped_to_source() {
        let (_tmp, db) = test_db().await;
        db.upsert_entity("A", &scene("42", "a"), ReplicaDb::sync_stamp())
            .await
            .unwrap();
        db.upsert_entity("B", &scene("42", "b"), ReplicaDb::sync_stamp())
            .await
            .unwrap();

        let pass_start = ReplicaDb::sync_stamp();
        db.mark_unseen_deleted("A", EntityKind::Scene, pass_start)
            .await
            .unwrap();

        assert_eq!(db.count_live(EntityKind::Scene, Some("A")).await.unwrap(), 0);
        assert_eq!(db.count_live(EntityKind::Scene, Some("B")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_source_entities() {
        let (_tmp, db) = test_db().await;
        let performer = EntityRecord::new(
            "p1",
            PerformerAttrs {
                name: Some("Someone".to_string()),
                ..Default::default()
            },
        )
        .with_edges(EdgeSet::new(Junction::PerformerTags, vec!["t1".to_string()]));
        db.upsert_entity("A", &performer, ReplicaDb::sync_stamp()).await.unwrap();
        db.upsert_entity("B", &scene("1", "keep"), ReplicaDb::sync_stamp())
            .await
            .unwrap();

        let removed = db.purge_source_entities("A").await.unwrap();
        assert_eq!(removed, 1);
        assert!(db.get_entity::<PerformerAttrs>("A", "p1").await.unwrap().is_none());
        assert!(db
            .edge_targets("A", Junction::PerformerTags, "p1")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(db.count_live(EntityKind::Scene, Some("B")).await.unwrap(), 1);
    }
}
