//! Catalog Mirror
//!
//! Keeps a local SQLite replica of one or more upstream media catalogs and
//! answers filtered, sorted, paged queries from it:
//! - **Sync**: full and incremental passes per (source, kind), on demand or on a schedule
//! - **Reads**: composite-keyed rows merged with per-user ratings and play stats
//! - **Daemon**: `mirror run` keeps the replica fresh until Ctrl-C

mod cli;

use clap::{Parser, Subcommand};
use cli::CliContext;
use mirror_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "mirror")]
#[command(author, version, about = "Local replica of upstream media catalogs")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (defaults to <mirror home>/config.toml)
    #[arg(long, global = true, env = "MIRROR_CONFIG")]
    config: Option<PathBuf>,

    /// Replica database file (overrides the config file)
    #[arg(long, global = true, env = "MIRROR_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage upstream sources
    Source {
        #[command(subcommand)]
        action: cli::source::SourceAction,
    },
    /// Run one sync pass now
    Sync(cli::sync::SyncArgs),
    /// Show sync state per source and kind
    Status(cli::status::StatusArgs),
    /// Query cached entities
    Find(cli::find::FindArgs),
    /// Full-text search over one kind
    Search(cli::search::SearchArgs),
    /// Run the sync scheduler until Ctrl-C
    Run(cli::run::RunArgs),
    /// Show configuration and paths
    Config(cli::config::ConfigArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "mirror",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:?}", err);
            ExitCode::from(1)
        }
    }
}

fn run_command(cli: Cli) -> anyhow::Result<()> {
    let ctx = CliContext::load(cli.config, cli.database)?;

    match cli.command {
        Commands::Source { action } => cli::source::run(&ctx, action),
        Commands::Sync(args) => cli::sync::run(&ctx, args),
        Commands::Status(args) => cli::status::run(&ctx, args),
        Commands::Find(args) => cli::find::run(&ctx, args),
        Commands::Search(args) => cli::search::run(&ctx, args),
        Commands::Run(args) => cli::run::run(&ctx, args),
        Commands::Config(args) => cli::config::run(&ctx, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::source::SourceAction;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_find_with_globals() {
        let cli = Cli::try_parse_from([
            "mirror",
            "find",
            "scene",
            "--q",
            "beach",
            "--sort",
            "rating100",
            "--desc",
            "--database",
            "/tmp/replica.db",
        ])
        .unwrap();
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/replica.db")));
        match cli.command {
            Commands::Find(args) => {
                assert_eq!(args.kind, "scene");
                assert_eq!(args.q.as_deref(), Some("beach"));
                assert!(args.desc);
                assert_eq!(args.page, 1);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_sync_full_and_incremental_conflict() {
        let result = Cli::try_parse_from(["mirror", "sync", "--full", "--incremental"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_source_add() {
        let cli = Cli::try_parse_from([
            "mirror",
            "source",
            "add",
            "home",
            "http://localhost:9999/graphql",
            "--id",
            "A",
        ])
        .unwrap();
        match cli.command {
            Commands::Source {
                action: SourceAction::Add { name, id, priority, .. },
            } => {
                assert_eq!(name, "home");
                assert_eq!(id.as_deref(), Some("A"));
                assert_eq!(priority, 0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
