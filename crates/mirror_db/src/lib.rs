//! Replica store for Catalog Mirror.
//!
//! One SQLite file holds the mirrored catalog (one typed table per entity kind,
//! junction tables for relations, an FTS5 index per kind), the sync bookkeeping
//! and the per-user overlay tables. The read path lives in [`query`].
//!
//! ```rust,ignore
//! use mirror_db::ReplicaDb;
//!
//! let db = ReplicaDb::open("~/.catalog_mirror/replica.sqlite3").await?;
//! let sources = db.list_sources().await?;
//! let states = db.list_sync_states(None).await?;
//! ```

mod entities;
mod error;
mod layout;
mod model;
mod overlay;
mod ready;
mod schema;
mod search;
mod sources;
mod sync_state;

pub mod query;

pub use error::{DbError, Result};
pub use layout::{
    layout, ColumnDef, ColumnType, Junction, KindLayout, RelationDef, RelationVia, StatsLayout,
};
pub use model::{
    CachedEntity, CatalogRecord, EdgeSet, EdgeTarget, EntityAttrs, EntityRecord, GalleryAttrs,
    GroupAttrs, ImageAttrs, PerformerAttrs, SceneAttrs, StudioAttrs, TagAttrs,
};
pub use overlay::UserOverlay;
pub use ready::ReadinessGate;
pub use search::SearchHit;
pub use sources::{NewSource, SourceConfig};
pub use sync_state::{SyncState, SyncSuccess};

pub use mirror_ids::{CompositeKey, EntityKind};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::info;

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the replica database. Cheap to clone.
#[derive(Clone)]
pub struct ReplicaDb {
    pool: SqlitePool,
}

impl ReplicaDb {
    /// Open or create a replica at the given path and ensure the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Replica opened");
        Ok(db)
    }

    /// Open an existing replica (fails if the file is missing).
    pub async fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DbError::not_found(format!(
                "Replica not found: {}",
                path.display()
            )));
        }
        Self::open(path).await
    }

    /// Escape hatch for ad-hoc queries. Prefer the typed methods.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

static LAST_SYNC_STAMP: AtomicI64 = AtomicI64::new(0);

// Timestamp utilities
impl ReplicaDb {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Strictly increasing millisecond stamp for `synced_at` and pass starts.
    ///
    /// Every rule comparing `synced_at` against a pass start relies on a stamp
    /// issued later in the process being greater than every earlier one.
    pub fn sync_stamp() -> i64 {
        let now = Self::now_millis();
        let mut prev = LAST_SYNC_STAMP.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match LAST_SYNC_STAMP.compare_exchange_weak(
                prev,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_else(chrono::Utc::now)
    }
}
