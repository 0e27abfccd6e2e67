//! Per-user overlay rows: ratings, favorites and play statistics.
//!
//! The read path joins these tables; the helpers below are what user-facing
//! endpoints call to write them.

use crate::error::{DbError, Result};
use crate::layout::{layout, ColumnType, KindLayout, StatsLayout};
use crate::ReplicaDb;
use mirror_ids::{EntityKind, UserId};
use serde::Serialize;
use sqlx::FromRow;

/// Overlay values merged into every query row. Missing rows resolve to the
/// zero values: no rating, not a favorite, zero counters, no timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, FromRow)]
pub struct UserOverlay {
    pub user_rating: Option<i64>,
    pub user_favorite: bool,
    pub user_play_count: i64,
    pub user_o_count: i64,
    pub user_play_duration: f64,
    pub user_resume_time: f64,
    pub user_last_played_at: Option<i64>,
    pub user_last_o_at: Option<i64>,
}

/// Filterable and sortable overlay fields.
pub(crate) const OVERLAY_FIELDS: &[(&str, ColumnType)] = &[
    ("user_rating", ColumnType::Integer),
    ("user_favorite", ColumnType::Bool),
    ("user_play_count", ColumnType::Integer),
    ("user_o_count", ColumnType::Integer),
    ("user_play_duration", ColumnType::Real),
    ("user_resume_time", ColumnType::Real),
    ("user_last_played_at", ColumnType::Timestamp),
    ("user_last_o_at", ColumnType::Timestamp),
];

pub(crate) fn overlay_field_type(name: &str) -> Option<ColumnType> {
    OVERLAY_FIELDS
        .iter()
        .find(|(field, _)| *field == name)
        .map(|(_, ty)| *ty)
}

/// SQL expression for an overlay field of `layout`'s kind, already defaulted.
///
/// Expects the rating table joined as `ur` and the stats table as `us`.
pub(crate) fn overlay_expr(layout: &KindLayout, field: &str) -> Option<&'static str> {
    let expr = match field {
        "user_rating" => "ur.rating",
        "user_favorite" => "COALESCE(ur.favorite, 0)",
        _ => match (layout.stats, field) {
            (StatsLayout::Scene, "user_play_count") => "COALESCE(us.play_count, 0)",
            (StatsLayout::Scene, "user_o_count") => "COALESCE(us.o_count, 0)",
            (StatsLayout::Scene, "user_play_duration") => "COALESCE(us.play_duration, 0.0)",
            (StatsLayout::Scene, "user_resume_time") => "COALESCE(us.resume_time, 0.0)",
            (StatsLayout::Scene, "user_last_played_at") => "us.last_played_at",
            (StatsLayout::Scene, "user_last_o_at") => "us.last_o_at",
            (StatsLayout::Image, "user_play_count") => "COALESCE(us.view_count, 0)",
            (StatsLayout::Image, "user_o_count") => "COALESCE(us.o_count, 0)",
            (StatsLayout::Image, "user_last_played_at") => "us.last_viewed_at",
            (StatsLayout::Image, "user_last_o_at") => "us.last_o_at",
            (StatsLayout::Aggregate(_), "user_play_count") => "COALESCE(us.play_count, 0)",
            (StatsLayout::Aggregate(_), "user_o_count") => "COALESCE(us.o_count, 0)",
            (StatsLayout::Aggregate(_), "user_last_played_at") => "us.last_played_at",
            (StatsLayout::Aggregate(_), "user_last_o_at") => "us.last_o_at",
            (_, "user_play_count" | "user_o_count") => "0",
            (_, "user_play_duration" | "user_resume_time") => "0.0",
            (_, "user_last_played_at" | "user_last_o_at") => "NULL",
            _ => return None,
        },
    };
    Some(expr)
}

/// Stats table name for a kind, if it has one.
pub(crate) fn stats_table(layout: &KindLayout) -> Option<&'static str> {
    match layout.stats {
        StatsLayout::Scene => Some("user_scene_stats"),
        StatsLayout::Image => Some("user_image_stats"),
        StatsLayout::Aggregate(table) => Some(table),
        StatsLayout::None => None,
    }
}

/// `SELECT` list producing a [`UserOverlay`] for `layout`'s kind.
pub(crate) fn overlay_select(layout: &KindLayout) -> String {
    OVERLAY_FIELDS
        .iter()
        .filter_map(|(field, _)| overlay_expr(layout, field).map(|expr| format!("{expr} AS {field}")))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ReplicaDb {
    /// Set or clear a user's rating (0-100 scale).
    pub async fn set_rating(
        &self,
        user: &UserId,
        kind: EntityKind,
        source_id: &str,
        entity_id: &str,
        rating: Option<i64>,
    ) -> Result<()> {
        if let Some(rating) = rating {
            if !(0..=100).contains(&rating) {
                return Err(DbError::invalid_state(format!(
                    "rating {rating} outside 0..=100"
                )));
            }
        }
        let sql = format!(
            r#"
            INSERT INTO {} (user_id, source_id, entity_id, rating, favorite, updated_at)
            VALUES (?, ?, ?, ?, 0, ?)
            ON CONFLICT (user_id, source_id, entity_id) DO UPDATE SET
                rating = excluded.rating,
                updated_at = excluded.updated_at
            "#,
            layout(kind).rating_table
        );
        sqlx::query(&sql)
            .bind(user.as_str())
            .bind(source_id)
            .bind(entity_id)
            .bind(rating)
            .bind(Self::now_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_favorite(
        &self,
        user: &UserId,
        kind: EntityKind,
        source_id: &str,
        entity_id: &str,
        favorite: bool,
    ) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (user_id, source_id, entity_id, rating, favorite, updated_at)
            VALUES (?, ?, ?, NULL, ?, ?)
            ON CONFLICT (user_id, source_id, entity_id) DO UPDATE SET
                favorite = excluded.favorite,
                updated_at = excluded.updated_at
            "#,
            layout(kind).rating_table
        );
        sqlx::query(&sql)
            .bind(user.as_str())
            .bind(source_id)
            .bind(entity_id)
            .bind(favorite)
            .bind(Self::now_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Count one play (a view, for images). Scenes also accumulate the played
    /// duration and remember where playback stopped.
    pub async fn record_play(
        &self,
        user: &UserId,
        kind: EntityKind,
        source_id: &str,
        entity_id: &str,
        played_secs: f64,
        resume_time: f64,
    ) -> Result<()> {
        let layout = layout(kind);
        let now = Self::now_millis();
        let sql = match layout.stats {
            StatsLayout::Scene => r#"
                INSERT INTO user_scene_stats (user_id, source_id, entity_id, play_count, play_duration, resume_time, last_played_at, updated_at)
                VALUES (?, ?, ?, 1, ?, ?, ?, ?)
                ON CONFLICT (user_id, source_id, entity_id) DO UPDATE SET
                    play_count = user_scene_stats.play_count + 1,
                    play_duration = user_scene_stats.play_duration + excluded.play_duration,
                    resume_time = excluded.resume_time,
                    last_played_at = excluded.last_played_at,
                    updated_at = excluded.updated_at
                "#
            .to_string(),
            StatsLayout::Image => r#"
                INSERT INTO user_image_stats (user_id, source_id, entity_id, view_count, last_viewed_at, updated_at)
                VALUES (?, ?, ?, 1, ?, ?)
                ON CONFLICT (user_id, source_id, entity_id) DO UPDATE SET
                    view_count = user_image_stats.view_count + 1,
                    last_viewed_at = excluded.last_viewed_at,
                    updated_at = excluded.updated_at
                "#
            .to_string(),
            StatsLayout::Aggregate(table) => format!(
                r#"
                INSERT INTO {table} (user_id, source_id, entity_id, play_count, last_played_at, updated_at)
                VALUES (?, ?, ?, 1, ?, ?)
                ON CONFLICT (user_id, source_id, entity_id) DO UPDATE SET
                    play_count = {table}.play_count + 1,
                    last_played_at = excluded.last_played_at,
                    updated_at = excluded.updated_at
                "#
            ),
            StatsLayout::None => {
                return Err(DbError::invalid_state(format!(
                    "{kind} has no play statistics"
                )))
            }
        };

        let mut query = sqlx::query(&sql)
            .bind(user.as_str())
            .bind(source_id)
            .bind(entity_id);
        if layout.stats == StatsLayout::Scene {
            query = query.bind(played_secs.max(0.0)).bind(resume_time.max(0.0));
        }
        query.bind(now).bind(now).execute(&self.pool).await?;
        Ok(())
    }

    /// Increment the o-counter overlay.
    pub async fn record_o(
        &self,
        user: &UserId,
        kind: EntityKind,
        source_id: &str,
        entity_id: &str,
    ) -> Result<()> {
        let layout = layout(kind);
        let Some(table) = stats_table(layout) else {
            return Err(DbError::invalid_state(format!("{kind} has no o-counter")));
        };
        let sql = format!(
            r#"
            INSERT INTO {table} (user_id, source_id, entity_id, o_count, last_o_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT (user_id, source_id, entity_id) DO UPDATE SET
                o_count = {table}.o_count + 1,
                last_o_at = excluded.last_o_at,
                updated_at = excluded.updated_at
            "#
        );
        let now = Self::now_millis();
        sqlx::query(&sql)
            .bind(user.as_str())
            .bind(source_id)
            .bind(entity_id)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
