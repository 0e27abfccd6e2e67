//! Ranked full-text search over live rows.

use crate::error::Result;
use crate::layout::layout;
use crate::ReplicaDb;
use mirror_ids::{make_ref, CompositeKey, EntityKind};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub key: CompositeKey,
    pub id: String,
    pub source_id: String,
    pub label: Option<String>,
    /// bm25 score; lower is better.
    pub rank: f64,
}

/// Turn free text into an FTS5 query: every term quoted and prefix-matched,
/// all terms required. Returns `None` when nothing searchable is left.
pub(crate) fn fts_match_expr(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '\''))
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{}\"*", term.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

impl ReplicaDb {
    /// Best matches first. Soft-deleted rows are never in the index.
    pub async fn search(
        &self,
        kind: EntityKind,
        text: &str,
        limit: u32,
    ) -> Result<Vec<SearchHit>> {
        let Some(expr) = fts_match_expr(text) else {
            return Ok(Vec::new());
        };
        let layout = layout(kind);
        let sql = format!(
            r#"
            SELECT base.id, base.source_id, base.{label} AS label, bm25({fts}) AS score
            FROM {fts}
            JOIN {table} base ON base.row_id = {fts}.rowid
            WHERE {fts} MATCH ? AND base.deleted_at IS NULL
            ORDER BY score, base.id, base.source_id
            LIMIT ?
            "#,
            label = layout.label_column,
            fts = layout.fts_table,
            table = layout.table,
        );

        let rows = sqlx::query(&sql)
            .bind(expr)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_hit).collect())
    }
}

fn row_to_hit(row: &SqliteRow) -> SearchHit {
    let id: String = row.get("id");
    let source_id: String = row.get("source_id");
    SearchHit {
        key: make_ref(&id, &source_id),
        id,
        source_id,
        label: row.get("label"),
        rank: row.get("score"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityRecord, PerformerAttrs, SceneAttrs};
    use tempfile::TempDir;

    #[test]
    fn test_fts_match_expr() {
        assert_eq!(fts_match_expr("  "), None);
        assert_eq!(fts_match_expr("sunset beach").unwrap(), "\"sunset\"* \"beach\"*");
        assert_eq!(fts_match_expr("a-b").unwrap(), "\"a\"* \"b\"*");
        assert_eq!(fts_match_expr("say \"hi\"").unwrap(), "\"say\"* \"hi\"*");
    }

    #[tokio::test]
    async fn test_search_tracks_renames_and_deletes() {
        let tmp = TempDir::new().unwrap();
        let db = ReplicaDb::open(tmp.path().join("search.db")).await.unwrap();

        let record = |title: &str| {
            EntityRecord::new(
                "1",
                SceneAttrs {
                    title: Some(title.to_string()),
                    ..Default::default()
                },
            )
        };

        db.upsert_entity("A", &record("Sunset Beach"), ReplicaDb::sync_stamp())
            .await
            .unwrap();
        let hits = db.search(EntityKind::Scene, "sunset", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key.as_str(), "1:A");

        db.upsert_entity("A", &record("Mountain Lake"), ReplicaDb::sync_stamp())
            .await
            .unwrap();
        assert!(db.search(EntityKind::Scene, "sunset", 10).await.unwrap().is_empty());
        assert_eq!(db.search(EntityKind::Scene, "mount", 10).await.unwrap().len(), 1);

        let pass_start = ReplicaDb::sync_stamp();
        db.mark_unseen_deleted("A", EntityKind::Scene, pass_start)
            .await
            .unwrap();
        assert!(db.search(EntityKind::Scene, "mountain", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_ranks_and_spans_sources() {
        let tmp = TempDir::new().unwrap();
        let db = ReplicaDb::open(tmp.path().join("search.db")).await.unwrap();

        for (source, name) in [("A", "Jane Doe"), ("B", "Jane Doe"), ("A", "Janet")] {
            let id = if name == "Janet" { "2" } else { "1" };
            let record = EntityRecord::new(
                id,
                PerformerAttrs {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
            );
            db.upsert_entity(source, &record, ReplicaDb::sync_stamp())
                .await
                .unwrap();
        }

        let hits = db.search(EntityKind::Performer, "jane doe", 10).await.unwrap();
        let keys: Vec<_> = hits.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["1:A", "1:B"]);
        assert_eq!(db.search(EntityKind::Performer, "jan", 10).await.unwrap().len(), 3);
    }
}
