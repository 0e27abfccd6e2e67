//! Source command - manage upstream catalog servers

use crate::cli::output::{format_stamp, print_table};
use crate::cli::{resolve_source, CliContext};
use clap::Subcommand;
use mirror_db::{NewSource, ReadinessGate, ReplicaDb};
use mirror_ids::SourceId;
use tracing::info;

#[derive(Subcommand, Debug, Clone)]
pub enum SourceAction {
    /// List configured sources
    List {
        #[arg(long)]
        json: bool,
    },
    /// Register a new upstream server
    Add {
        /// Unique display name
        name: String,
        /// GraphQL endpoint, e.g. http://localhost:9999/graphql
        endpoint: String,
        #[arg(long, env = "MIRROR_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        /// Explicit source id (the suffix of composite keys); generated if omitted
        #[arg(long)]
        id: Option<String>,
        /// Lower values sync first
        #[arg(long, default_value_t = 0)]
        priority: i64,
    },
    /// Remove a source and its sync state (cached rows stay until purged)
    Remove { name: String },
    /// Resume syncing a source
    Enable { name: String },
    /// Stop syncing a source; cached rows stay queryable
    Disable { name: String },
    /// Delete every cached row of a source
    Purge { name: String },
}

pub fn run(ctx: &CliContext, action: SourceAction) -> anyhow::Result<()> {
    let rt = crate::cli::runtime()?;
    rt.block_on(run_async(ctx, action))
}

async fn run_async(ctx: &CliContext, action: SourceAction) -> anyhow::Result<()> {
    let db = ctx.open_db().await?;
    let engine = ctx.engine(db.clone(), ReadinessGate::new());

    match action {
        SourceAction::List { json } => list(&db, json).await,
        SourceAction::Add {
            name,
            endpoint,
            api_key,
            id,
            priority,
        } => {
            let id = id
                .map(|id| SourceId::parse(&id))
                .transpose()?
                .map(SourceId::into_inner);
            let source = db
                .add_source(NewSource {
                    id,
                    name,
                    endpoint,
                    api_key,
                    priority,
                })
                .await?;
            info!(source = %source.id, name = %source.name, "Source added");
            println!("Added source '{}' ({})", source.name, source.id);
            Ok(())
        }
        SourceAction::Remove { name } => {
            let source = resolve_source(&db, &name).await?;
            engine.remove_source(&source.id).await?;
            println!("Removed source '{}'", source.name);
            println!("Cached rows are kept. Purge a source before removing it to drop them.");
            Ok(())
        }
        SourceAction::Enable { name } => {
            let source = resolve_source(&db, &name).await?;
            engine.enable_source(&source.id).await?;
            println!("Enabled source '{}'", source.name);
            Ok(())
        }
        SourceAction::Disable { name } => {
            let source = resolve_source(&db, &name).await?;
            engine.disable_source(&source.id).await?;
            println!("Disabled source '{}'", source.name);
            Ok(())
        }
        SourceAction::Purge { name } => {
            let source = resolve_source(&db, &name).await?;
            let removed = engine.purge_source(&source.id).await?;
            println!("Purged {} cached rows of '{}'", removed, source.name);
            Ok(())
        }
    }
}

async fn list(db: &ReplicaDb, json: bool) -> anyhow::Result<()> {
    let sources = db.list_sources().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    if sources.is_empty() {
        println!("No sources configured.");
        println!("TRY: mirror source add <name> <endpoint>");
        return Ok(());
    }

    let now = ReplicaDb::now_millis();
    let rows = sources
        .iter()
        .map(|source| {
            vec![
                source.id.clone(),
                source.name.clone(),
                source.endpoint.clone(),
                if source.enabled { "yes" } else { "no" }.to_string(),
                source.priority.to_string(),
                format_stamp(Some(source.created_at), now),
            ]
        })
        .collect();
    print_table(
        &["ID", "NAME", "ENDPOINT", "ENABLED", "PRIORITY", "ADDED"],
        rows,
    );
    Ok(())
}
