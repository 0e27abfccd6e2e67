//! CLI module for Catalog Mirror
//!
//! Every command works on the local replica. `sync` and `run` also talk to the
//! configured upstream servers; `find`, `search` and `status` never do.

pub mod config;
pub mod error;
pub mod output;

pub mod find;
pub mod run;
pub mod search;
pub mod source;
pub mod status;
pub mod sync;

use anyhow::{Context, Result};
use config::MirrorConfig;
use error::HelpfulError;
use mirror_db::{ReadinessGate, ReplicaDb, SourceConfig};
use mirror_sync::{GraphQlConnector, SyncEngine};
use std::path::PathBuf;
use std::sync::Arc;

/// Resolved configuration shared by all commands.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub config_path: PathBuf,
    pub config: MirrorConfig,
    pub database: PathBuf,
}

impl CliContext {
    /// Load the config file and apply command line overrides.
    pub fn load(config_path: Option<PathBuf>, database: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => config::default_config_path()?,
        };
        let config = MirrorConfig::load_or_default(&config_path)
            .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
        let database = match database {
            Some(path) => path,
            None => config.resolve_database(&config::mirror_home()?),
        };
        Ok(Self {
            config_path,
            config,
            database,
        })
    }

    /// Open the replica, creating it if needed.
    pub async fn open_db(&self) -> Result<ReplicaDb> {
        ReplicaDb::open(&self.database)
            .await
            .with_context(|| format!("Failed to open replica: {}", self.database.display()))
    }

    /// Open a replica that must already exist.
    pub async fn open_existing_db(&self) -> Result<ReplicaDb> {
        if !self.database.exists() {
            return Err(HelpfulError::replica_not_found(&self.database).into());
        }
        self.open_db().await
    }

    pub fn engine(&self, db: ReplicaDb, gate: ReadinessGate) -> SyncEngine {
        let connector = GraphQlConnector::new(self.config.request_timeout());
        SyncEngine::with_options(db, Arc::new(connector), gate, self.config.sync_options())
    }
}

/// Resolve a source by id or name.
pub async fn resolve_source(db: &ReplicaDb, id_or_name: &str) -> Result<SourceConfig> {
    db.find_source(id_or_name)
        .await?
        .ok_or_else(|| HelpfulError::source_not_found(id_or_name).into())
}

/// Build a tokio runtime for one command.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}
