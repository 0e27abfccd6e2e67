//! Sync command - one on-demand pass, then exit

use crate::cli::error::HelpfulError;
use crate::cli::output::{format_duration_ms, print_table};
use crate::cli::{resolve_source, CliContext};
use clap::Args;
use mirror_db::{ReadinessGate, SourceConfig};
use mirror_ids::EntityKind;
use mirror_sync::{SyncError, SyncMode, SyncOutcome};

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Only this source (id or name); every enabled source otherwise
    #[arg(long)]
    pub source: Option<String>,

    /// Only this entity kind
    #[arg(long)]
    pub kind: Option<String>,

    /// Re-list everything and soft-delete rows the upstream no longer has
    #[arg(long, conflicts_with = "incremental")]
    pub full: bool,

    /// Only fetch changes since the last pass
    #[arg(long)]
    pub incremental: bool,
}

impl SyncArgs {
    fn mode(&self) -> SyncMode {
        if self.full {
            SyncMode::Full
        } else if self.incremental {
            SyncMode::Incremental
        } else {
            SyncMode::Auto
        }
    }
}

pub fn run(ctx: &CliContext, args: SyncArgs) -> anyhow::Result<()> {
    let rt = crate::cli::runtime()?;
    rt.block_on(run_async(ctx, args))
}

async fn run_async(ctx: &CliContext, args: SyncArgs) -> anyhow::Result<()> {
    let kinds = match &args.kind {
        Some(kind) => {
            vec![EntityKind::parse(kind).map_err(|_| HelpfulError::invalid_kind(kind))?]
        }
        None => EntityKind::ALL.to_vec(),
    };

    let db = ctx.open_db().await?;
    let sources: Vec<SourceConfig> = match &args.source {
        Some(name) => vec![resolve_source(&db, name).await?],
        None => db.list_enabled_sources().await?,
    };
    if sources.is_empty() {
        println!("No enabled sources.");
        println!("TRY: mirror source add <name> <endpoint>");
        return Ok(());
    }

    let engine = ctx.engine(db, ReadinessGate::new());
    let mode = args.mode();
    let mut rows = Vec::new();
    let mut failures = 0;

    for source in &sources {
        for &kind in &kinds {
            let result = engine.run_sync(&source.id, kind, mode).await;
            if result.is_err() {
                failures += 1;
            }
            rows.push(result_row(source, kind, result));
        }
    }

    print_table(
        &["SOURCE", "KIND", "MODE", "WRITTEN", "DELETED", "DURATION", "RESULT"],
        rows,
    );

    if failures > 0 {
        anyhow::bail!("{} of {} sync units failed", failures, sources.len() * kinds.len());
    }
    Ok(())
}

fn result_row(
    source: &SourceConfig,
    kind: EntityKind,
    result: Result<SyncOutcome, SyncError>,
) -> Vec<String> {
    match result {
        Ok(SyncOutcome::Completed(report)) => vec![
            source.name.clone(),
            kind.to_string(),
            report.mode.to_string(),
            report.written.to_string(),
            report.deleted.to_string(),
            format_duration_ms(report.duration_ms),
            "ok".to_string(),
        ],
        Ok(SyncOutcome::AlreadyRunning) => vec![
            source.name.clone(),
            kind.to_string(),
            "-".to_string(),
            "-".to_string(),
            "-".to_string(),
            "-".to_string(),
            "already running".to_string(),
        ],
        Err(err) => vec![
            source.name.clone(),
            kind.to_string(),
            "-".to_string(),
            "-".to_string(),
            "-".to_string(),
            "-".to_string(),
            err.to_string(),
        ],
    }
}
