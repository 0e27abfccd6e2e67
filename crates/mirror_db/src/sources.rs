//! Upstream source configuration.

use crate::error::{DbError, Result};
use crate::ReplicaDb;
use mirror_ids::SourceId;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// A configured upstream catalog server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub enabled: bool,
    /// Lower values sync first.
    pub priority: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for registering a source.
#[derive(Debug, Clone)]
pub struct NewSource {
    /// Explicit id; a random one is generated when absent.
    pub id: Option<String>,
    pub name: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub priority: i64,
}

const SOURCE_COLUMNS: &str =
    "id, name, endpoint, api_key, enabled, priority, created_at, updated_at";

impl ReplicaDb {
    /// Register a new source. Names are unique.
    pub async fn add_source(&self, source: NewSource) -> Result<SourceConfig> {
        let id = match source.id {
            Some(id) => id,
            None => SourceId::generate().into_inner(),
        };
        let now = Self::now_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO sources (id, name, endpoint, api_key, enabled, priority, created_at, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&source.name)
        .bind(&source.endpoint)
        .bind(&source.api_key)
        .bind(source.priority)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                return Err(DbError::constraint(format!(
                    "source '{}' already exists",
                    source.name
                )));
            }
            Err(err) => return Err(err.into()),
        }

        self.get_source(&id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("source {id}")))
    }

    pub async fn get_source(&self, id: &str) -> Result<Option<SourceConfig>> {
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_source))
    }

    pub async fn get_source_by_name(&self, name: &str) -> Result<Option<SourceConfig>> {
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE name = ?");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_source))
    }

    /// Resolve a source by id first, then by name.
    pub async fn find_source(&self, id_or_name: &str) -> Result<Option<SourceConfig>> {
        match self.get_source(id_or_name).await? {
            Some(source) => Ok(Some(source)),
            None => self.get_source_by_name(id_or_name).await,
        }
    }

    pub async fn list_sources(&self) -> Result<Vec<SourceConfig>> {
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources ORDER BY priority, name");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_source).collect())
    }

    pub async fn list_enabled_sources(&self) -> Result<Vec<SourceConfig>> {
        let sql = format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE enabled = 1 ORDER BY priority, name"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_source).collect())
    }

    pub async fn count_sources(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sources")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn set_source_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let result = sqlx::query("UPDATE sources SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(Self::now_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("source {id}")));
        }
        Ok(())
    }

    pub async fn update_source_endpoint(
        &self,
        id: &str,
        endpoint: &str,
        api_key: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sources SET endpoint = ?, api_key = ?, updated_at = ? WHERE id = ?",
        )
        .bind(endpoint)
        .bind(api_key)
        .bind(Self::now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("source {id}")));
        }
        Ok(())
    }

    /// Remove a source and its sync state. Cached rows stay until purged.
    pub async fn remove_source(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM sync_state WHERE source_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("source {id}")));
        }
        tx.commit().await?;
        Ok(())
    }
}

fn row_to_source(row: &SqliteRow) -> SourceConfig {
    SourceConfig {
        id: row.get("id"),
        name: row.get("name"),
        endpoint: row.get("endpoint"),
        api_key: row.get("api_key"),
        enabled: row.get("enabled"),
        priority: row.get("priority"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_source(id: &str, name: &str, priority: i64) -> NewSource {
        NewSource {
            id: Some(id.to_string()),
            name: name.to_string(),
            endpoint: format!("http://{name}.local/graphql"),
            api_key: None,
            priority,
        }
    }

    #[tokio::test]
    async fn test_add_list_and_toggle_sources() {
        let tmp = TempDir::new().unwrap();
        let db = ReplicaDb::open(tmp.path().join("sources.db")).await.unwrap();

        db.add_source(new_source("b", "beta", 1)).await.unwrap();
        let alpha = db.add_source(new_source("a", "alpha", 0)).await.unwrap();
        assert!(alpha.enabled);

        let names: Vec<_> = db.list_sources().await.unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        db.set_source_enabled("a", false).await.unwrap();
        let enabled = db.list_enabled_sources().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "b");

        assert_eq!(db.find_source("beta").await.unwrap().unwrap().id, "b");
        assert_eq!(db.count_sources().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_constraint_error() {
        let tmp = TempDir::new().unwrap();
        let db = ReplicaDb::open(tmp.path().join("sources.db")).await.unwrap();

        db.add_source(new_source("a", "main", 0)).await.unwrap();
        let err = db.add_source(new_source("b", "main", 0)).await.unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_generated_id_and_remove() {
        let tmp = TempDir::new().unwrap();
        let db = ReplicaDb::open(tmp.path().join("sources.db")).await.unwrap();

        let mut source = new_source("unused", "gen", 0);
        source.id = None;
        let created = db.add_source(source).await.unwrap();
        assert!(!created.id.is_empty());

        db.remove_source(&created.id).await.unwrap();
        assert!(db.get_source(&created.id).await.unwrap().is_none());
        assert!(matches!(
            db.remove_source(&created.id).await,
            Err(DbError::NotFound(_))
        ));
    }
}
