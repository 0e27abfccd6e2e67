//! One sync pass for one (source, kind) pair.
//!
//! Design principles:
//! - At most one pass per pair; a second trigger coalesces into the running one
//! - One transaction per entity, so a failed or cancelled pass keeps what it wrote
//! - Soft deletion only after a full listing was written without error
//! - Every failure is recorded on the pair and never leaks into other pairs

use crate::cancel::SyncCancelToken;
use crate::client::{CatalogClient, SourceConnector};
use crate::error::{SourceError, SyncError};
use mirror_db::{ReadinessGate, ReplicaDb, SyncSuccess};
use mirror_ids::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Re-list everything and soft-delete what was not seen.
    Full,
    /// List changes since the stored cursor.
    Incremental,
    /// Incremental when the pair has a successful full sync, full otherwise.
    Auto,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::Auto => "auto",
        })
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub page_size: u32,
    /// Kinds every enabled source must have fully synced before reads open.
    pub required_kinds: Vec<EntityKind>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            required_kinds: EntityKind::ALL.to_vec(),
        }
    }
}

/// What a finished pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub source_id: String,
    pub kind: EntityKind,
    /// The mode that actually ran; never `Auto`.
    pub mode: SyncMode,
    pub written: u64,
    pub deleted: u64,
    pub cursor: Option<i64>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// A pass for the pair was already running; this trigger was dropped.
    AlreadyRunning,
}

type UnitKey = (String, EntityKind);
type Registry = Arc<Mutex<HashMap<UnitKey, RunningUnit>>>;

/// Registry entry for a running unit.
struct RunningUnit {
    token: SyncCancelToken,
    /// Closes once the unit has left the registry.
    finished: watch::Receiver<()>,
}

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<UnitKey, RunningUnit>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registration of a running unit. Dropping it frees the pair and wakes
/// anyone waiting for the unit to finish.
struct InFlight {
    registry: Registry,
    key: UnitKey,
    token: SyncCancelToken,
    _finished: watch::Sender<()>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut units = lock(&self.registry);
        if units.get(&self.key).is_some_and(|u| u.token.same_as(&self.token)) {
            units.remove(&self.key);
        }
    }
}

/// Runs sync passes against the replica. Cheap to clone.
#[derive(Clone)]
pub struct SyncEngine {
    db: ReplicaDb,
    connector: Arc<dyn SourceConnector>,
    gate: ReadinessGate,
    options: SyncOptions,
    in_flight: Registry,
}

impl SyncEngine {
    pub fn new(db: ReplicaDb, connector: Arc<dyn SourceConnector>, gate: ReadinessGate) -> Self {
        Self::with_options(db, connector, gate, SyncOptions::default())
    }

    pub fn with_options(
        db: ReplicaDb,
        connector: Arc<dyn SourceConnector>,
        gate: ReadinessGate,
        options: SyncOptions,
    ) -> Self {
        Self {
            db,
            connector,
            gate,
            options: SyncOptions {
                page_size: options.page_size.max(1),
                ..options
            },
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn db(&self) -> &ReplicaDb {
        &self.db
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub async fn run_full_sync(
        &self,
        source_id: &str,
        kind: EntityKind,
    ) -> Result<SyncOutcome, SyncError> {
        self.run_sync(source_id, kind, SyncMode::Full).await
    }

    pub async fn run_incremental_sync(
        &self,
        source_id: &str,
        kind: EntityKind,
    ) -> Result<SyncOutcome, SyncError> {
        self.run_sync(source_id, kind, SyncMode::Incremental).await
    }

    /// Run one pass for the pair.
    ///
    /// Failures are recorded in the pair's sync state before being returned.
    pub async fn run_sync(
        &self,
        source_id: &str,
        kind: EntityKind,
        mode: SyncMode,
    ) -> Result<SyncOutcome, SyncError> {
        let source = self
            .db
            .get_source(source_id)
            .await?
            .ok_or_else(|| SyncError::SourceNotFound(source_id.to_string()))?;
        if !source.enabled {
            return Err(SyncError::SourceDisabled(source_id.to_string()));
        }

        let Some(unit) = self.register(source_id, kind) else {
            debug!(source = %source_id, kind = %kind, "Sync already running, trigger coalesced");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let started = Instant::now();
        self.db.record_sync_attempt(source_id, kind).await?;

        let result = match self.connector.connect(&source) {
            Ok(client) => self.run_unit(client.as_ref(), &unit, mode).await,
            Err(err) => Err(SyncError::from(err)),
        };
        let duration_ms = elapsed_ms(started);

        match result {
            Ok(mut report) => {
                report.duration_ms = duration_ms;
                self.record_success(&report).await?;
                info!(
                    source = %source_id,
                    kind = %kind,
                    mode = %report.mode,
                    count = report.written,
                    deleted = report.deleted,
                    duration_ms,
                    "Sync completed"
                );
                self.evaluate_readiness().await;
                Ok(SyncOutcome::Completed(report))
            }
            Err(err) => {
                warn!(
                    source = %source_id,
                    kind = %kind,
                    mode = %mode,
                    duration_ms,
                    transient = err.is_transient(),
                    error = %err,
                    "Sync failed"
                );
                self.record_failure(source_id, kind, &err, duration_ms).await;
                Err(err)
            }
        }
    }

    /// Sync every kind of one source in dependency order.
    pub async fn sync_source(
        &self,
        source_id: &str,
        mode: SyncMode,
    ) -> Vec<(EntityKind, Result<SyncOutcome, SyncError>)> {
        let mut results = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            results.push((kind, self.run_sync(source_id, kind, mode).await));
        }
        results
    }

    /// Cancel every running unit of a source. Returns how many were signalled.
    pub fn cancel_source(&self, source_id: &str) -> usize {
        self.signal_source(source_id).len()
    }

    pub fn cancel_all(&self) -> usize {
        let units = lock(&self.in_flight);
        units.values().for_each(|unit| unit.token.cancel());
        units.len()
    }

    /// Cancel a source's running units and wait until every one of them has
    /// finished, including recording its outcome.
    async fn stop_source(&self, source_id: &str) -> usize {
        let pending = self.signal_source(source_id);
        let stopped = pending.len();
        for mut finished in pending {
            // Only closes; no value is ever sent.
            while finished.changed().await.is_ok() {}
        }
        stopped
    }

    fn signal_source(&self, source_id: &str) -> Vec<watch::Receiver<()>> {
        let units = lock(&self.in_flight);
        let mut pending = Vec::new();
        for ((unit_source, kind), unit) in units.iter() {
            if unit_source == source_id {
                debug!(source = %source_id, kind = %kind, "Cancelling sync unit");
                unit.token.cancel();
                pending.push(unit.finished.clone());
            }
        }
        pending
    }

    /// Pairs with a pass in progress.
    pub fn running_units(&self) -> Vec<(String, EntityKind)> {
        let mut units: Vec<_> = lock(&self.in_flight).keys().cloned().collect();
        units.sort();
        units
    }

    /// Disable a source and stop its running passes. Cached rows stay.
    pub async fn disable_source(&self, source_id: &str) -> Result<(), SyncError> {
        self.db.set_source_enabled(source_id, false).await?;
        let cancelled = self.cancel_source(source_id);
        info!(source = %source_id, cancelled, "Source disabled");
        Ok(())
    }

    pub async fn enable_source(&self, source_id: &str) -> Result<(), SyncError> {
        self.db.set_source_enabled(source_id, true).await?;
        info!(source = %source_id, "Source enabled");
        Ok(())
    }

    /// Remove a source's configuration and sync state once its passes have stopped.
    pub async fn remove_source(&self, source_id: &str) -> Result<(), SyncError> {
        let cancelled = self.stop_source(source_id).await;
        self.db.remove_source(source_id).await?;
        info!(source = %source_id, cancelled, "Source removed");
        Ok(())
    }

    /// Drop every cached row of a source once its passes have stopped.
    /// Overlay rows are kept.
    pub async fn purge_source(&self, source_id: &str) -> Result<u64, SyncError> {
        self.stop_source(source_id).await;
        let removed = self.db.purge_source_entities(source_id).await?;
        info!(source = %source_id, count = removed, "Source rows purged");
        Ok(removed)
    }

    /// Re-check the readiness gate. Errors are logged, the gate stays as is.
    pub async fn evaluate_readiness(&self) -> bool {
        match self.gate.evaluate(&self.db, &self.options.required_kinds).await {
            Ok(ready) => ready,
            Err(err) => {
                warn!(error = %err, "Failed to evaluate replica readiness");
                self.gate.is_ready()
            }
        }
    }

    fn register(&self, source_id: &str, kind: EntityKind) -> Option<InFlight> {
        let key = (source_id.to_string(), kind);
        let mut units = lock(&self.in_flight);
        if units.contains_key(&key) {
            return None;
        }
        let token = SyncCancelToken::new();
        let (finished_tx, finished) = watch::channel(());
        units.insert(
            key.clone(),
            RunningUnit {
                token: token.clone(),
                finished,
            },
        );
        Some(InFlight {
            registry: Arc::clone(&self.in_flight),
            key,
            token,
            _finished: finished_tx,
        })
    }

    async fn run_unit(
        &self,
        client: &dyn CatalogClient,
        unit: &InFlight,
        mode: SyncMode,
    ) -> Result<SyncReport, SyncError> {
        let (source_id, kind) = (&unit.key.0, unit.key.1);
        let state = self.db.get_sync_state(source_id, kind).await?;
        let cursor = state
            .as_ref()
            .filter(|state| state.has_full_sync())
            .and_then(|state| state.incremental_cursor);

        match (mode, cursor) {
            (SyncMode::Full, _) => self.full_pass(client, unit).await,
            (SyncMode::Incremental | SyncMode::Auto, Some(since)) => {
                self.incremental_pass(client, unit, since).await
            }
            (SyncMode::Incremental | SyncMode::Auto, None) => {
                debug!(source = %source_id, kind = %kind, "No completed full sync, running full pass");
                self.full_pass(client, unit).await
            }
        }
    }

    async fn full_pass(
        &self,
        client: &dyn CatalogClient,
        unit: &InFlight,
    ) -> Result<SyncReport, SyncError> {
        let (source_id, kind) = (unit.key.0.as_str(), unit.key.1);
        let per_page = self.options.page_size;
        let pass_start = ReplicaDb::sync_stamp();

        let mut page = 1;
        let mut seen: u64 = 0;
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut first_total: Option<u64> = None;
        let mut last_total: u64 = 0;
        let mut cursor: Option<i64> = None;
        loop {
            check_cancelled(unit)?;
            let listing = client.list_all(kind, page, per_page).await?;
            let fetched = listing.records.len();
            cursor = max_opt(cursor, self.write_page(unit, &listing.records).await?);
            seen += fetched as u64;
            seen_ids.extend(listing.records.iter().map(|record| record.id().to_string()));
            first_total.get_or_insert(listing.total);
            last_total = listing.total;
            debug!(source = %source_id, kind = %kind, page, count = fetched, "Page written");

            if is_last_page(fetched, per_page, seen_ids.len() as u64, listing.total) {
                break;
            }
            page += 1;
        }

        // A cancelled pass may have missed rows; deleting now would be wrong.
        check_cancelled(unit)?;
        let distinct = seen_ids.len() as u64;
        let deleted = if first_total == Some(last_total) && distinct >= last_total {
            self.db.mark_unseen_deleted(source_id, kind, pass_start).await?
        } else {
            // Rows shifted between pages; the next full pass deletes instead.
            warn!(
                source = %source_id,
                kind = %kind,
                seen = distinct,
                total = last_total,
                "Listing changed during pass, soft delete deferred"
            );
            0
        };
        if deleted > 0 {
            info!(source = %source_id, kind = %kind, count = deleted, "Soft-deleted unseen rows");
        }

        Ok(SyncReport {
            source_id: source_id.to_string(),
            kind,
            mode: SyncMode::Full,
            written: seen,
            deleted,
            cursor,
            duration_ms: 0,
        })
    }

    async fn incremental_pass(
        &self,
        client: &dyn CatalogClient,
        unit: &InFlight,
        since: i64,
    ) -> Result<SyncReport, SyncError> {
        let (source_id, kind) = (unit.key.0.as_str(), unit.key.1);
        let per_page = self.options.page_size;

        let mut page = 1;
        let mut seen: u64 = 0;
        let mut cursor = since;
        loop {
            check_cancelled(unit)?;
            let listing = client.list_updated_since(kind, since, page, per_page).await?;
            let fetched = listing.records.len();
            if let Some(page_max) = self.write_page(unit, &listing.records).await? {
                // The page is durable; the watermark may move past it.
                if page_max > cursor {
                    cursor = page_max;
                    self.db.advance_incremental_cursor(source_id, kind, cursor).await?;
                }
            }
            seen += fetched as u64;

            if is_last_page(fetched, per_page, seen, listing.total) {
                break;
            }
            page += 1;
        }

        Ok(SyncReport {
            source_id: source_id.to_string(),
            kind,
            mode: SyncMode::Incremental,
            written: seen,
            deleted: 0,
            cursor: Some(cursor),
            duration_ms: 0,
        })
    }

    /// Upsert one page, returning the highest upstream `updated_at` in it.
    async fn write_page(
        &self,
        unit: &InFlight,
        records: &[mirror_db::CatalogRecord],
    ) -> Result<Option<i64>, SyncError> {
        let (source_id, kind) = (unit.key.0.as_str(), unit.key.1);
        let mut page_max = None;
        for record in records {
            check_cancelled(unit)?;
            if record.kind() != kind {
                return Err(SourceError::malformed(format!(
                    "listing for {kind} returned a {} record",
                    record.kind()
                ))
                .into());
            }
            self.db
                .upsert_record(source_id, record, ReplicaDb::sync_stamp())
                .await?;
            page_max = max_opt(page_max, record.updated_at());
        }
        Ok(page_max)
    }

    async fn record_failure(&self, source_id: &str, kind: EntityKind, err: &SyncError, duration_ms: i64) {
        // A source removed mid-pass must not get its sync state back.
        match self.db.get_source(source_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(lookup_err) => {
                warn!(source = %source_id, error = %lookup_err, "Failed to look up source");
                return;
            }
        }
        if let Err(record_err) = self
            .db
            .record_sync_failure(source_id, kind, &err.to_string(), 0, duration_ms)
            .await
        {
            warn!(source = %source_id, kind = %kind, error = %record_err, "Failed to record sync failure");
        }
    }

    async fn record_success(&self, report: &SyncReport) -> Result<(), SyncError> {
        if self.db.get_source(&report.source_id).await?.is_none() {
            return Err(SyncError::SourceNotFound(report.source_id.clone()));
        }
        let total = self
            .db
            .count_live(report.kind, Some(&report.source_id))
            .await?;
        let success = SyncSuccess {
            finished_at: ReplicaDb::now_millis(),
            cursor: report.cursor,
            count: i64::try_from(report.written).unwrap_or(i64::MAX),
            duration_ms: report.duration_ms,
            total_entities: total,
        };
        match report.mode {
            SyncMode::Full => {
                self.db
                    .record_full_sync(&report.source_id, report.kind, success)
                    .await?
            }
            SyncMode::Incremental | SyncMode::Auto => {
                self.db
                    .record_incremental_sync(&report.source_id, report.kind, success)
                    .await?
            }
        }
        Ok(())
    }
}

fn check_cancelled(unit: &InFlight) -> Result<(), SyncError> {
    if unit.token.is_cancelled() {
        return Err(SyncError::Cancelled {
            source_id: unit.key.0.clone(),
            kind: unit.key.1,
        });
    }
    Ok(())
}

fn is_last_page(fetched: usize, per_page: u32, seen: u64, total: u64) -> bool {
    fetched == 0 || fetched < per_page as usize || seen >= total
}

fn max_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
