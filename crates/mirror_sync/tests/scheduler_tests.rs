//! Background scheduling: rounds, triggers and shutdown.

mod common;

use common::{harness, scene, tag, FakeCatalog};
use mirror_ids::EntityKind;
use mirror_sync::{SchedulerConfig, SyncError, SyncMode, SyncScheduler};
use std::time::Duration;

fn config(kinds: Vec<EntityKind>) -> SchedulerConfig {
    SchedulerConfig {
        interval: Duration::from_millis(50),
        full_sync_every: 3,
        max_concurrent_units: 2,
        kinds,
    }
}

#[tokio::test]
async fn test_round_covers_enabled_sources_only() {
    let kinds = vec![EntityKind::Tag, EntityKind::Scene];
    let h = harness(kinds.clone()).await;
    let a = FakeCatalog::new();
    a.put(tag("1", "t", 1));
    a.put(scene("1", "s", 1));
    let b = FakeCatalog::new();
    b.put(scene("9", "b", 1));
    let c = FakeCatalog::new();
    h.add_source("A", a).await;
    h.add_source("B", b).await;
    h.add_source("C", c.clone()).await;
    h.engine.disable_source("C").await.unwrap();

    let scheduler = SyncScheduler::new(h.engine.clone(), config(kinds));
    let summary = scheduler.run_round(SyncMode::Auto).await.unwrap();
    assert_eq!(summary.completed, 4);
    assert_eq!(summary.failed, 0);
    assert!(c.calls().is_empty());
    assert!(h.gate.is_ready());
}

#[tokio::test]
async fn test_trigger_one_source() {
    let kinds = vec![EntityKind::Scene];
    let h = harness(kinds.clone()).await;
    let a = FakeCatalog::new();
    a.put(scene("1", "s", 1));
    let b = FakeCatalog::new();
    h.add_source("A", a.clone()).await;
    h.add_source("B", b.clone()).await;

    let scheduler = SyncScheduler::new(h.engine.clone(), config(kinds));
    let summary = scheduler.trigger(Some("A"), SyncMode::Full).await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(a.calls().len(), 1);
    assert!(b.calls().is_empty());

    let err = scheduler.trigger(Some("missing"), SyncMode::Full).await.unwrap_err();
    assert!(matches!(err, SyncError::SourceNotFound(_)));
}

#[tokio::test]
async fn test_failed_unit_does_not_stop_round() {
    let kinds = vec![EntityKind::Tag, EntityKind::Scene];
    let h = harness(kinds.clone()).await;
    let a = FakeCatalog::new();
    a.put(tag("1", "t", 1));
    a.fail_from(EntityKind::Scene, 1, true);
    h.add_source("A", a).await;

    let scheduler = SyncScheduler::new(h.engine.clone(), config(kinds));
    let summary = scheduler.run_round(SyncMode::Full).await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert!(!h.gate.is_ready());
}

#[tokio::test]
async fn test_spawned_scheduler_syncs_then_shuts_down() {
    let kinds = vec![EntityKind::Scene];
    let h = harness(kinds.clone()).await;
    let a = FakeCatalog::new();
    a.put(scene("1", "first", 1));
    h.add_source("A", a.clone()).await;

    let handle = SyncScheduler::new(h.engine.clone(), config(kinds)).spawn();

    let ready = tokio::time::timeout(Duration::from_secs(5), async {
        while !h.gate.is_ready() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(ready.is_ok());

    // A later change arrives through an incremental tick.
    a.put(scene("2", "second", 5));
    let synced = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if h.db.count_live(EntityKind::Scene, None).await.unwrap() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(synced.is_ok());

    handle.shutdown().await;
    assert!(h.engine.running_units().is_empty());
}
