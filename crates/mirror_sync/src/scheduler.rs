//! Background sync loop.
//!
//! Rounds run every enabled source × kind as independent units, bounded by a
//! semaphore. The first round is `Auto`; later rounds are incremental, with a
//! full round every `full_sync_every` ticks. Reads never wait on any of this.

use crate::engine::{SyncEngine, SyncMode, SyncOutcome};
use crate::error::SyncError;
use mirror_ids::EntityKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Every n-th tick is a full round. 0 disables periodic full rounds.
    pub full_sync_every: u32,
    pub max_concurrent_units: usize,
    pub kinds: Vec<EntityKind>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            full_sync_every: 12,
            max_concurrent_units: 4,
            kinds: EntityKind::ALL.to_vec(),
        }
    }
}

/// Tally of one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub completed: usize,
    pub coalesced: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RoundSummary {
    fn add(&mut self, result: &Result<SyncOutcome, SyncError>) {
        match result {
            Ok(SyncOutcome::Completed(_)) => self.completed += 1,
            Ok(SyncOutcome::AlreadyRunning) => self.coalesced += 1,
            Err(err) if err.is_cancelled() => self.cancelled += 1,
            Err(_) => self.failed += 1,
        }
    }
}

#[derive(Clone)]
pub struct SyncScheduler {
    engine: SyncEngine,
    config: Arc<SchedulerConfig>,
    permits: Arc<Semaphore>,
}

impl SyncScheduler {
    pub fn new(engine: SyncEngine, config: SchedulerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_units.max(1)));
        Self {
            engine,
            config: Arc::new(config),
            permits,
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// On-demand sync of one source, or of every enabled source.
    pub async fn trigger(
        &self,
        source_id: Option<&str>,
        mode: SyncMode,
    ) -> Result<RoundSummary, SyncError> {
        let sources = match source_id {
            Some(id) => {
                let source = self
                    .engine
                    .db()
                    .get_source(id)
                    .await?
                    .ok_or_else(|| SyncError::SourceNotFound(id.to_string()))?;
                if !source.enabled {
                    return Err(SyncError::SourceDisabled(id.to_string()));
                }
                vec![source.id]
            }
            None => self.enabled_source_ids().await?,
        };
        info!(sources = sources.len(), mode = %mode, "Sync triggered");
        Ok(self.run_units(sources, mode).await)
    }

    /// One round over every enabled source.
    pub async fn run_round(&self, mode: SyncMode) -> Result<RoundSummary, SyncError> {
        let sources = self.enabled_source_ids().await?;
        Ok(self.run_units(sources, mode).await)
    }

    async fn enabled_source_ids(&self) -> Result<Vec<String>, SyncError> {
        let sources = self.engine.db().list_enabled_sources().await?;
        Ok(sources.into_iter().map(|source| source.id).collect())
    }

    async fn run_units(&self, sources: Vec<String>, mode: SyncMode) -> RoundSummary {
        let mut units = JoinSet::new();
        for source_id in sources {
            for &kind in &self.config.kinds {
                let engine = self.engine.clone();
                let permits = Arc::clone(&self.permits);
                let source_id = source_id.clone();
                units.spawn(async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return Err(SyncError::Cancelled { source_id, kind });
                        }
                    };
                    engine.run_sync(&source_id, kind, mode).await
                });
            }
        }

        let mut summary = RoundSummary::default();
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(result) => summary.add(&result),
                Err(e) => {
                    error!("Sync unit panicked: {:?}", e);
                    summary.failed += 1;
                }
            }
        }
        debug!(
            completed = summary.completed,
            coalesced = summary.coalesced,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Sync round finished"
        );
        summary
    }

    fn mode_for_tick(&self, tick: u64) -> SyncMode {
        match self.config.full_sync_every {
            0 => SyncMode::Incremental,
            every if tick % u64::from(every) == 0 => SyncMode::Full,
            _ => SyncMode::Incremental,
        }
    }

    /// Loop until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately and runs the startup round.
        interval.tick().await;

        info!(
            interval_secs = self.config.interval.as_secs(),
            full_sync_every = self.config.full_sync_every,
            "Sync scheduler started"
        );

        let mut tick: u64 = 0;
        loop {
            let mode = if tick == 0 {
                SyncMode::Auto
            } else {
                self.mode_for_tick(tick)
            };

            let round = self.run_round(mode);
            tokio::pin!(round);
            let finished = tokio::select! {
                biased;
                _ = shutdown.changed() => None,
                result = &mut round => Some(result),
            };
            match finished {
                Some(Ok(summary)) => {
                    if summary.failed > 0 {
                        warn!(failed = summary.failed, mode = %mode, "Sync round had failures");
                    }
                }
                Some(Err(e)) => error!(error = %e, "Sync round could not start"),
                None => {
                    let cancelled = self.engine.cancel_all();
                    info!(cancelled, "Shutdown requested, stopping running units");
                    // Units stop at their next page boundary.
                    let _ = round.await;
                    break;
                }
            }

            tick += 1;
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = interval.tick() => {}
            }
        }

        info!("Sync scheduler stopped");
    }

    /// Run the loop on a background task.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, join }
    }
}

/// Handle for stopping a spawned scheduler.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Request shutdown and wait for running units to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            error!("Sync scheduler task failed: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_tally() {
        let mut summary = RoundSummary::default();
        summary.add(&Ok(SyncOutcome::AlreadyRunning));
        summary.add(&Err(SyncError::SourceNotFound("A".to_string())));
        summary.add(&Err(SyncError::Cancelled {
            source_id: "A".to_string(),
            kind: EntityKind::Tag,
        }));
        assert_eq!(
            summary,
            RoundSummary {
                completed: 0,
                coalesced: 1,
                failed: 1,
                cancelled: 1,
            }
        );
    }
}
