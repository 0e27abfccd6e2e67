//! Search command - ranked full-text lookup

use crate::cli::error::HelpfulError;
use crate::cli::output::print_table;
use crate::cli::CliContext;
use clap::Args;
use mirror_ids::EntityKind;

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    pub kind: String,

    pub query: String,

    #[arg(long, default_value_t = 20)]
    pub limit: u32,

    #[arg(long)]
    pub json: bool,
}

pub fn run(ctx: &CliContext, args: SearchArgs) -> anyhow::Result<()> {
    let rt = crate::cli::runtime()?;
    rt.block_on(run_async(ctx, args))
}

async fn run_async(ctx: &CliContext, args: SearchArgs) -> anyhow::Result<()> {
    let kind = EntityKind::parse(&args.kind).map_err(|_| HelpfulError::invalid_kind(&args.kind))?;
    let db = ctx.open_existing_db().await?;
    let hits = db.search(kind, &args.query, args.limit.max(1)).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No {}s match '{}'.", kind, args.query);
        return Ok(());
    }

    let rows = hits
        .into_iter()
        .map(|hit| {
            vec![
                hit.key.to_string(),
                hit.label.unwrap_or_default(),
                format!("{:.3}", hit.rank),
            ]
        })
        .collect();
    print_table(&["KEY", "LABEL", "SCORE"], rows);
    Ok(())
}
