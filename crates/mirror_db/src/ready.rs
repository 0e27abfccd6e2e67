//! One-way cache readiness latch.

use crate::error::Result;
use crate::ReplicaDb;
use mirror_ids::EntityKind;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Closed until every enabled source has completed a full sync of every
/// required kind. Once open it stays open for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct ReadinessGate {
    open: Arc<AtomicBool>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gate that starts open. Useful for tools that read a replica offline.
    pub fn opened() -> Self {
        let gate = Self::new();
        gate.open.store(true, Ordering::Release);
        gate
    }

    pub fn is_ready(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Re-check persisted sync state and open the gate if it is satisfied.
    pub async fn evaluate(&self, db: &ReplicaDb, required: &[EntityKind]) -> Result<bool> {
        if self.is_ready() {
            return Ok(true);
        }

        let sources = db.list_enabled_sources().await?;
        let synced: HashSet<(String, String)> = db
            .list_sync_states(None)
            .await?
            .into_iter()
            .filter(|state| state.has_full_sync())
            .map(|state| (state.source_id, state.entity_kind))
            .collect();

        let satisfied = sources.iter().all(|source| {
            required
                .iter()
                .all(|kind| synced.contains(&(source.id.clone(), kind.as_str().to_string())))
        });

        if satisfied && !self.open.swap(true, Ordering::AcqRel) {
            info!(sources = sources.len(), "Replica ready: initial full sync complete");
        }
        Ok(self.is_ready())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NewSource, SyncSuccess};
    use tempfile::TempDir;

    fn success() -> SyncSuccess {
        SyncSuccess {
            finished_at: 1,
            cursor: None,
            count: 0,
            duration_ms: 0,
            total_entities: 0,
        }
    }

    #[tokio::test]
    async fn test_gate_opens_once_all_pairs_synced() {
        let tmp = TempDir::new().unwrap();
        let db = ReplicaDb::open(tmp.path().join("ready.db")).await.unwrap();
        db.add_source(NewSource {
            id: Some("A".to_string()),
            name: "alpha".to_string(),
            endpoint: "http://a".to_string(),
            api_key: None,
            priority: 0,
        })
        .await
        .unwrap();

        let gate = ReadinessGate::new();
        let required = [EntityKind::Scene, EntityKind::Tag];
        assert!(!gate.evaluate(&db, &required).await.unwrap());

        db.record_full_sync("A", EntityKind::Scene, success()).await.unwrap();
        assert!(!gate.evaluate(&db, &required).await.unwrap());

        db.record_full_sync("A", EntityKind::Tag, success()).await.unwrap();
        assert!(gate.evaluate(&db, &required).await.unwrap());

        // Later changes never close it again.
        db.remove_source("A").await.unwrap();
        assert!(gate.evaluate(&db, &required).await.unwrap());
        assert!(gate.clone().is_ready());
    }

    #[tokio::test]
    async fn test_gate_with_no_enabled_sources_is_open() {
        let tmp = TempDir::new().unwrap();
        let db = ReplicaDb::open(tmp.path().join("ready.db")).await.unwrap();
        let gate = ReadinessGate::new();
        assert!(gate.evaluate(&db, &EntityKind::ALL).await.unwrap());
    }
}
