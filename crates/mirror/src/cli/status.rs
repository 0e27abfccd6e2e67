//! Status command - sync state per source and kind

use crate::cli::output::{format_absolute, format_duration_ms, format_stamp, print_table, truncate};
use crate::cli::CliContext;
use clap::Args;
use mirror_db::{ReadinessGate, ReplicaDb, SourceConfig, SyncState};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    ready: bool,
    sources: Vec<SourceConfig>,
    states: Vec<SyncState>,
}

pub fn run(ctx: &CliContext, args: StatusArgs) -> anyhow::Result<()> {
    let rt = crate::cli::runtime()?;
    rt.block_on(run_async(ctx, args))
}

async fn run_async(ctx: &CliContext, args: StatusArgs) -> anyhow::Result<()> {
    let db = ctx.open_existing_db().await?;
    let gate = ReadinessGate::new();
    let ready = gate.evaluate(&db, &ctx.config.sync.required_kinds).await?;
    let sources = db.list_sources().await?;
    let states = db.list_sync_states(None).await?;

    if args.json {
        let output = StatusOutput {
            ready,
            sources,
            states,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Replica: {}", ctx.database.display());
    println!(
        "Ready:   {}",
        if ready { "yes" } else { "no (initial full sync incomplete)" }
    );
    println!();

    if states.is_empty() {
        println!("No sync has run yet.");
        println!("TRY: mirror sync --full");
        return Ok(());
    }

    let names: HashMap<&str, &str> = sources
        .iter()
        .map(|source| (source.id.as_str(), source.name.as_str()))
        .collect();
    let now = ReplicaDb::now_millis();
    let rows = states
        .iter()
        .map(|state| {
            vec![
                names
                    .get(state.source_id.as_str())
                    .copied()
                    .unwrap_or(state.source_id.as_str())
                    .to_string(),
                state.entity_kind.clone(),
                format_stamp(state.last_full_sync_at, now),
                format_stamp(state.last_incremental_sync_at, now),
                state
                    .incremental_cursor
                    .map(format_absolute)
                    .unwrap_or_else(|| "-".to_string()),
                state.total_entities.to_string(),
                format!(
                    "{} in {}",
                    state.last_sync_count,
                    format_duration_ms(state.last_sync_duration_ms)
                ),
                state
                    .last_error
                    .as_deref()
                    .map(|err| truncate(err, 60))
                    .unwrap_or_default(),
            ]
        })
        .collect();

    print_table(
        &["SOURCE", "KIND", "FULL SYNC", "INCREMENTAL", "CURSOR", "TOTAL", "LAST PASS", "ERROR"],
        rows,
    );
    Ok(())
}
