//! Run command - sync daemon
//!
//! Starts the scheduler and keeps it going until Ctrl-C. Running passes are
//! cancelled on shutdown; whatever they already wrote stays in the replica.

use crate::cli::CliContext;
use clap::Args;
use mirror_db::ReadinessGate;
use mirror_sync::{SyncMode, SyncScheduler};
use tracing::{info, warn};

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Seconds between sync rounds (overrides the config file)
    #[arg(long)]
    pub interval: Option<u64>,

    /// Run one full round before the first scheduled tick
    #[arg(long)]
    pub full_first: bool,
}

pub fn run(ctx: &CliContext, args: RunArgs) -> anyhow::Result<()> {
    let rt = crate::cli::runtime()?;
    rt.block_on(run_async(ctx, args))
}

async fn run_async(ctx: &CliContext, args: RunArgs) -> anyhow::Result<()> {
    let db = ctx.open_db().await?;
    let gate = ReadinessGate::new();
    let engine = ctx.engine(db, gate);

    let mut config = ctx.config.scheduler_config();
    if let Some(secs) = args.interval {
        config.interval = std::time::Duration::from_secs(secs.max(1));
    }

    let ready = engine.evaluate_readiness().await;
    info!(
        database = %ctx.database.display(),
        interval_secs = config.interval.as_secs(),
        ready,
        "Starting sync daemon"
    );

    let scheduler = SyncScheduler::new(engine, config);
    if args.full_first {
        let summary = scheduler.run_round(SyncMode::Full).await?;
        info!(
            completed = summary.completed,
            failed = summary.failed,
            "Initial full round finished"
        );
    }

    let handle = scheduler.spawn();
    println!("Sync daemon running. Press Ctrl-C to stop.");

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for Ctrl-C, shutting down");
    }
    info!("Shutdown requested");
    handle.shutdown().await;
    info!("Sync daemon stopped");
    Ok(())
}
