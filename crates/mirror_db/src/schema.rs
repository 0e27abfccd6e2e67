//! Schema creation. Every statement is idempotent.

use crate::error::Result;
use crate::layout::{layout, KindLayout, StatsLayout, META_COLUMNS, Junction};
use crate::ReplicaDb;
use mirror_ids::EntityKind;
use tracing::info;

impl ReplicaDb {
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        self.create_bookkeeping_tables().await?;
        for kind in EntityKind::ALL {
            self.create_entity_tables(layout(kind)).await?;
        }
        self.create_junction_tables().await?;
        self.create_overlay_tables().await?;

        info!("Replica schema verified");
        Ok(())
    }

    async fn execute_all(&self, statements: &[String]) -> Result<()> {
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Source configuration and per-(source, kind) sync state.
    async fn create_bookkeeping_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                endpoint TEXT NOT NULL,
                api_key TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                priority INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sync_state (
                source_id TEXT NOT NULL,
                entity_kind TEXT NOT NULL,
                last_full_sync_at INTEGER,
                full_sync_cursor INTEGER,
                last_incremental_sync_at INTEGER,
                incremental_cursor INTEGER,
                last_attempt_at INTEGER,
                last_sync_count INTEGER NOT NULL DEFAULT 0,
                last_sync_duration_ms INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                total_entities INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (source_id, entity_kind)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Base table, indexes, FTS table and FTS triggers for one kind.
    async fn create_entity_tables(&self, layout: &KindLayout) -> Result<()> {
        let table = layout.table;
        let attr_columns: Vec<String> = layout
            .columns
            .iter()
            .map(|col| format!("{} {}", col.name, col.ty.sql_type()))
            .collect();

        let mut statements = vec![format!(
            r#"CREATE TABLE IF NOT EXISTS {table} (
                row_id INTEGER PRIMARY KEY,
                id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                {attrs},
                source_created_at INTEGER,
                source_updated_at INTEGER,
                synced_at INTEGER NOT NULL,
                deleted_at INTEGER,
                UNIQUE (source_id, id)
            )"#,
            attrs = attr_columns.join(",\n                "),
        )];

        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_live ON {table}(source_id, deleted_at)"
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_synced ON {table}(source_id, synced_at)"
        ));
        for col in layout.columns.iter().chain(META_COLUMNS.iter()) {
            if col.indexed {
                statements.push(format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_{name} ON {table}({name})",
                    name = col.name
                ));
            }
        }

        statements.extend(fts_statements(layout));
        self.execute_all(&statements).await
    }

    async fn create_junction_tables(&self) -> Result<()> {
        let mut statements = Vec::new();
        for junction in Junction::ALL {
            let (_, owner, _, target) = junction.ends();
            let table = junction.table();
            let position = junction
                .position_column()
                .map(|col| format!("{col} INTEGER,\n                "))
                .unwrap_or_default();

            // No foreign keys: edges may point at rows not synced yet.
            statements.push(format!(
                r#"CREATE TABLE IF NOT EXISTS {table} (
                source_id TEXT NOT NULL,
                {owner} TEXT NOT NULL,
                {target} TEXT NOT NULL,
                {position}PRIMARY KEY (source_id, {owner}, {target})
            )"#
            ));
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_target ON {table}(source_id, {target})"
            ));
        }
        self.execute_all(&statements).await
    }

    /// Per-user ratings, favorites and play statistics.
    async fn create_overlay_tables(&self) -> Result<()> {
        let mut statements = Vec::new();
        for kind in EntityKind::ALL {
            let rating_table = layout(kind).rating_table;
            statements.push(format!(
                r#"CREATE TABLE IF NOT EXISTS {rating_table} (
                user_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                rating INTEGER,
                favorite INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, source_id, entity_id)
            )"#
            ));

            if let StatsLayout::Aggregate(stats_table) = layout(kind).stats {
                statements.push(format!(
                    r#"CREATE TABLE IF NOT EXISTS {stats_table} (
                    user_id TEXT NOT NULL,
                    source_id TEXT NOT NULL,
                    entity_id TEXT NOT NULL,
                    play_count INTEGER NOT NULL DEFAULT 0,
                    o_count INTEGER NOT NULL DEFAULT 0,
                    last_played_at INTEGER,
                    last_o_at INTEGER,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (user_id, source_id, entity_id)
                )"#
                ));
            }
        }
        self.execute_all(&statements).await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS user_scene_stats (
                user_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                play_count INTEGER NOT NULL DEFAULT 0,
                play_duration REAL NOT NULL DEFAULT 0,
                resume_time REAL NOT NULL DEFAULT 0,
                o_count INTEGER NOT NULL DEFAULT 0,
                last_played_at INTEGER,
                last_o_at INTEGER,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, source_id, entity_id)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS user_image_stats (
                user_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                view_count INTEGER NOT NULL DEFAULT 0,
                o_count INTEGER NOT NULL DEFAULT 0,
                last_viewed_at INTEGER,
                last_o_at INTEGER,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, source_id, entity_id)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// FTS5 table plus the triggers that keep it equal to the live rows.
///
/// The index holds a row iff `deleted_at IS NULL`, keyed by the base `row_id`.
fn fts_statements(layout: &KindLayout) -> Vec<String> {
    let table = layout.table;
    let fts = layout.fts_table;
    let cols = layout.fts_columns.join(", ");
    let new_values = layout
        .fts_columns
        .iter()
        .map(|col| format!("new.{col}"))
        .collect::<Vec<_>>()
        .join(", ");

    vec![
        format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {fts} USING fts5({cols}, tokenize = 'unicode61 remove_diacritics 2')"
        ),
        format!(
            r#"CREATE TRIGGER IF NOT EXISTS {fts}_ai AFTER INSERT ON {table}
            WHEN new.deleted_at IS NULL
            BEGIN
                INSERT INTO {fts}(rowid, {cols}) VALUES (new.row_id, {new_values});
            END"#
        ),
        format!(
            r#"CREATE TRIGGER IF NOT EXISTS {fts}_au AFTER UPDATE ON {table}
            BEGIN
                DELETE FROM {fts} WHERE rowid = old.row_id;
                INSERT INTO {fts}(rowid, {cols}) SELECT new.row_id, {new_values} WHERE new.deleted_at IS NULL;
            END"#
        ),
        format!(
            r#"CREATE TRIGGER IF NOT EXISTS {fts}_ad AFTER DELETE ON {table}
            BEGIN
                DELETE FROM {fts} WHERE rowid = old.row_id;
            END"#
        ),
    ]
}
