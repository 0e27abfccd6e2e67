//! Sync engine for Catalog Mirror.
//!
//! Pulls entity listings from each configured source and writes them into the
//! replica:
//! - [`SyncEngine`] runs one pass for a (source, kind) pair: full or incremental
//! - [`SyncScheduler`] drives passes in the background with bounded concurrency
//! - [`CatalogClient`] is the upstream seam; [`GraphQlClient`] is the HTTP one
//!
//! ```rust,ignore
//! let engine = SyncEngine::new(db.clone(), Arc::new(GraphQlConnector::default()), gate.clone());
//! engine.run_sync("A", EntityKind::Scene, SyncMode::Auto).await?;
//! ```

mod cancel;
mod client;
mod engine;
mod error;
mod graphql;
mod scheduler;
mod wire;

pub use cancel::SyncCancelToken;
pub use client::{CatalogClient, CatalogPage, SourceConnector};
pub use engine::{SyncEngine, SyncMode, SyncOptions, SyncOutcome, SyncReport, DEFAULT_PAGE_SIZE};
pub use error::{SourceError, SyncError};
pub use graphql::{GraphQlClient, GraphQlConnector};
pub use scheduler::{RoundSummary, SchedulerConfig, SchedulerHandle, SyncScheduler};
