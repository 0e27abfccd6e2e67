//! The upstream seam: anything that can list catalog entities page by page.

use crate::error::SourceError;
use async_trait::async_trait;
use mirror_db::{CatalogRecord, SourceConfig};
use mirror_ids::EntityKind;
use std::sync::Arc;

/// One page of an upstream listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogPage {
    /// Total matching entities across all pages, as reported upstream.
    pub total: u64,
    pub records: Vec<CatalogRecord>,
}

/// Paginated access to one source's catalog.
///
/// Pages are 1-based. Listings are expected in ascending `updated_at` order
/// so a partial incremental pass never skips past unseen changes.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Every entity of `kind`.
    async fn list_all(
        &self,
        kind: EntityKind,
        page: u32,
        per_page: u32,
    ) -> Result<CatalogPage, SourceError>;

    /// Entities of `kind` updated at or after `since` (ms since epoch).
    ///
    /// Returning a few older entities is harmless; upserts are idempotent.
    async fn list_updated_since(
        &self,
        kind: EntityKind,
        since: i64,
        page: u32,
        per_page: u32,
    ) -> Result<CatalogPage, SourceError>;
}

/// Builds a client for a configured source.
pub trait SourceConnector: Send + Sync {
    fn connect(&self, source: &SourceConfig) -> Result<Arc<dyn CatalogClient>, SourceError>;
}
