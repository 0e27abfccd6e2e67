//! Per-(source, kind) sync bookkeeping.

use crate::error::Result;
use crate::ReplicaDb;
use mirror_ids::EntityKind;
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct SyncState {
    pub source_id: String,
    pub entity_kind: String,
    /// Wall clock of the last successful full pass.
    pub last_full_sync_at: Option<i64>,
    /// Highest upstream `updated_at` observed by that pass.
    pub full_sync_cursor: Option<i64>,
    pub last_incremental_sync_at: Option<i64>,
    /// Watermark for the next "updated since" listing.
    pub incremental_cursor: Option<i64>,
    pub last_attempt_at: Option<i64>,
    pub last_sync_count: i64,
    pub last_sync_duration_ms: i64,
    pub last_error: Option<String>,
    pub total_entities: i64,
}

impl SyncState {
    pub fn kind(&self) -> Option<EntityKind> {
        EntityKind::parse(&self.entity_kind).ok()
    }

    pub fn has_full_sync(&self) -> bool {
        self.last_full_sync_at.is_some()
    }
}

/// Outcome of a successful pass, written in one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSuccess {
    pub finished_at: i64,
    pub cursor: Option<i64>,
    pub count: i64,
    pub duration_ms: i64,
    pub total_entities: i64,
}

const STATE_COLUMNS: &str = "source_id, entity_kind, last_full_sync_at, full_sync_cursor, \
     last_incremental_sync_at, incremental_cursor, last_attempt_at, last_sync_count, \
     last_sync_duration_ms, last_error, total_entities";

impl ReplicaDb {
    pub async fn get_sync_state(
        &self,
        source_id: &str,
        kind: EntityKind,
    ) -> Result<Option<SyncState>> {
        let sql = format!(
            "SELECT {STATE_COLUMNS} FROM sync_state WHERE source_id = ? AND entity_kind = ?"
        );
        let state = sqlx::query_as::<_, SyncState>(&sql)
            .bind(source_id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(state)
    }

    /// All sync state rows, optionally for one source.
    pub async fn list_sync_states(&self, source_id: Option<&str>) -> Result<Vec<SyncState>> {
        let states = match source_id {
            Some(source_id) => {
                let sql = format!(
                    "SELECT {STATE_COLUMNS} FROM sync_state WHERE source_id = ? ORDER BY source_id, entity_kind"
                );
                sqlx::query_as::<_, SyncState>(&sql)
                    .bind(source_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql =
                    format!("SELECT {STATE_COLUMNS} FROM sync_state ORDER BY source_id, entity_kind");
                sqlx::query_as::<_, SyncState>(&sql)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(states)
    }

    /// Create the row if needed and stamp the attempt time.
    pub async fn record_sync_attempt(&self, source_id: &str, kind: EntityKind) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (source_id, entity_kind, last_attempt_at)
            VALUES (?, ?, ?)
            ON CONFLICT (source_id, entity_kind) DO UPDATE SET
                last_attempt_at = excluded.last_attempt_at
            "#,
        )
        .bind(source_id)
        .bind(kind.as_str())
        .bind(Self::now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// A full pass finished. The incremental watermark restarts from its cursor.
    pub async fn record_full_sync(
        &self,
        source_id: &str,
        kind: EntityKind,
        success: SyncSuccess,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (
                source_id, entity_kind, last_full_sync_at, full_sync_cursor, incremental_cursor,
                last_attempt_at, last_sync_count, last_sync_duration_ms, last_error, total_entities
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)
            ON CONFLICT (source_id, entity_kind) DO UPDATE SET
                last_full_sync_at = excluded.last_full_sync_at,
                full_sync_cursor = excluded.full_sync_cursor,
                incremental_cursor = COALESCE(excluded.incremental_cursor, sync_state.incremental_cursor),
                last_sync_count = excluded.last_sync_count,
                last_sync_duration_ms = excluded.last_sync_duration_ms,
                last_error = NULL,
                total_entities = excluded.total_entities
            "#,
        )
        .bind(source_id)
        .bind(kind.as_str())
        .bind(success.finished_at)
        .bind(success.cursor)
        .bind(success.cursor)
        .bind(success.finished_at)
        .bind(success.count)
        .bind(success.duration_ms)
        .bind(success.total_entities)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// An incremental pass finished. The cursor was already advanced page by page.
    pub async fn record_incremental_sync(
        &self,
        source_id: &str,
        kind: EntityKind,
        success: SyncSuccess,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (
                source_id, entity_kind, last_incremental_sync_at, incremental_cursor,
                last_attempt_at, last_sync_count, last_sync_duration_ms, last_error, total_entities
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?)
            ON CONFLICT (source_id, entity_kind) DO UPDATE SET
                last_incremental_sync_at = excluded.last_incremental_sync_at,
                incremental_cursor = COALESCE(excluded.incremental_cursor, sync_state.incremental_cursor),
                last_sync_count = excluded.last_sync_count,
                last_sync_duration_ms = excluded.last_sync_duration_ms,
                last_error = NULL,
                total_entities = excluded.total_entities
            "#,
        )
        .bind(source_id)
        .bind(kind.as_str())
        .bind(success.finished_at)
        .bind(success.cursor)
        .bind(success.finished_at)
        .bind(success.count)
        .bind(success.duration_ms)
        .bind(success.total_entities)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist the incremental watermark after a page is written. Never moves backwards.
    pub async fn advance_incremental_cursor(
        &self,
        source_id: &str,
        kind: EntityKind,
        cursor: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (source_id, entity_kind, incremental_cursor)
            VALUES (?, ?, ?)
            ON CONFLICT (source_id, entity_kind) DO UPDATE SET
                incremental_cursor = MAX(COALESCE(sync_state.incremental_cursor, excluded.incremental_cursor), excluded.incremental_cursor)
            "#,
        )
        .bind(source_id)
        .bind(kind.as_str())
        .bind(cursor)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt. Cursors and previous success stamps are kept.
    pub async fn record_sync_failure(
        &self,
        source_id: &str,
        kind: EntityKind,
        error: &str,
        count: i64,
        duration_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (
                source_id, entity_kind, last_attempt_at, last_sync_count, last_sync_duration_ms, last_error
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (source_id, entity_kind) DO UPDATE SET
                last_sync_count = excluded.last_sync_count,
                last_sync_duration_ms = excluded.last_sync_duration_ms,
                last_error = excluded.last_error
            "#,
        )
        .bind(source_id)
        .bind(kind.as_str())
        .bind(Self::now_millis())
        .bind(count)
        .bind(duration_ms)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn success(cursor: i64, count: i64) -> SyncSuccess {
        SyncSuccess {
            finished_at: ReplicaDb::now_millis(),
            cursor: Some(cursor),
            count,
            duration_ms: 12,
            total_entities: count,
        }
    }

    #[tokio::test]
    async fn test_state_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let db = ReplicaDb::open(tmp.path().join("state.db")).await.unwrap();

        assert!(db.get_sync_state("A", EntityKind::Scene).await.unwrap().is_none());

        db.record_sync_attempt("A", EntityKind::Scene).await.unwrap();
        let state = db.get_sync_state("A", EntityKind::Scene).await.unwrap().unwrap();
        assert!(state.last_attempt_at.is_some());
        assert!(!state.has_full_sync());

        db.record_full_sync("A", EntityKind::Scene, success(500, 3)).await.unwrap();
        let state = db.get_sync_state("A", EntityKind::Scene).await.unwrap().unwrap();
        assert!(state.has_full_sync());
        assert_eq!(state.full_sync_cursor, Some(500));
        assert_eq!(state.incremental_cursor, Some(500));
        assert_eq!(state.total_entities, 3);
        assert_eq!(state.kind(), Some(EntityKind::Scene));
    }

    #[tokio::test]
    async fn test_failure_keeps_cursor_and_success_clears_error() {
        let tmp = TempDir::new().unwrap();
        let db = ReplicaDb::open(tmp.path().join("state.db")).await.unwrap();

        db.record_full_sync("A", EntityKind::Tag, success(100, 1)).await.unwrap();
        db.advance_incremental_cursor("A", EntityKind::Tag, 200).await.unwrap();
        db.record_sync_failure("A", EntityKind::Tag, "connection refused", 0, 5)
            .await
            .unwrap();

        let state = db.get_sync_state("A", EntityKind::Tag).await.unwrap().unwrap();
        assert_eq!(state.last_error.as_deref(), Some("connection refused"));
        assert_eq!(state.incremental_cursor, Some(200));
        assert!(state.has_full_sync());

        db.record_incremental_sync("A", EntityKind::Tag, success(200, 0)).await.unwrap();
        let state = db.get_sync_state("A", EntityKind::Tag).await.unwrap().unwrap();
        assert!(state.last_error.is_none());
        assert!(state.last_incremental_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_cursor_never_moves_backwards() {
        let tmp = TempDir::new().unwrap();
        let db = ReplicaDb::open(tmp.path().join("state.db")).await.unwrap();

        db.advance_incremental_cursor("A", EntityKind::Image, 300).await.unwrap();
        db.advance_incremental_cursor("A", EntityKind::Image, 100).await.unwrap();
        let state = db.get_sync_state("A", EntityKind::Image).await.unwrap().unwrap();
        assert_eq!(state.incremental_cursor, Some(300));
    }

    #[tokio::test]
    async fn test_list_and_remove_with_source() {
        let tmp = TempDir::new().unwrap();
        let db = ReplicaDb::open(tmp.path().join("state.db")).await.unwrap();
        db.add_source(crate::NewSource {
            id: Some("A".to_string()),
            name: "alpha".to_string(),
            endpoint: "http://a".to_string(),
            api_key: None,
            priority: 0,
        })
        .await
        .unwrap();

        db.record_sync_attempt("A", EntityKind::Scene).await.unwrap();
        db.record_sync_attempt("A", EntityKind::Tag).await.unwrap();
        db.record_sync_attempt("B", EntityKind::Tag).await.unwrap();
        assert_eq!(db.list_sync_states(None).await.unwrap().len(), 3);
        assert_eq!(db.list_sync_states(Some("A")).await.unwrap().len(), 2);

        db.remove_source("A").await.unwrap();
        assert_eq!(db.list_sync_states(Some("A")).await.unwrap().len(), 0);
        assert_eq!(db.list_sync_states(None).await.unwrap().len(), 1);
    }
}
