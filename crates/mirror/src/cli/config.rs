//! Mirror configuration
//!
//! Reads `<mirror home>/config.toml`. Every field has a default, so a missing
//! file or a partial one is fine.

use mirror_ids::EntityKind;
use mirror_sync::{SchedulerConfig, SyncOptions, DEFAULT_PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("Could not determine mirror home: {0}")]
    Home(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub const CONFIG_FILE: &str = "config.toml";
pub const DATABASE_FILE: &str = "replica.sqlite3";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Replica file. Relative paths resolve against the mirror home.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub sync: SyncSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSection {
    /// Seconds between scheduler ticks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,

    /// Every n-th tick is a full pass; 0 turns periodic full passes off
    #[serde(default = "default_full_sync_every")]
    pub full_sync_every: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Kinds that must be fully synced before reads are served
    #[serde(default = "default_required_kinds")]
    pub required_kinds: Vec<EntityKind>,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            page_size: default_page_size(),
            max_concurrent_units: default_max_concurrent_units(),
            full_sync_every: default_full_sync_every(),
            request_timeout_secs: default_request_timeout_secs(),
            required_kinds: default_required_kinds(),
        }
    }
}

fn default_interval_secs() -> u64 { 300 }
fn default_page_size() -> u32 { DEFAULT_PAGE_SIZE }
fn default_max_concurrent_units() -> usize { 4 }
fn default_full_sync_every() -> u32 { 12 }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_required_kinds() -> Vec<EntityKind> { EntityKind::ALL.to_vec() }

impl MirrorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Where the replica lives, given the mirror home.
    pub fn resolve_database(&self, home: &Path) -> PathBuf {
        match &self.database_path {
            Some(path) => {
                let path = expand_tilde(path);
                if path.is_absolute() {
                    path
                } else {
                    home.join(path)
                }
            }
            None => home.join(DATABASE_FILE),
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            page_size: self.sync.page_size,
            required_kinds: self.sync.required_kinds.clone(),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.sync.interval_secs.max(1)),
            full_sync_every: self.sync.full_sync_every,
            max_concurrent_units: self.sync.max_concurrent_units,
            kinds: EntityKind::ALL.to_vec(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.request_timeout_secs.max(1))
    }
}

pub fn mirror_home() -> Result<PathBuf> {
    mirror_logging::mirror_home().map_err(|e| ConfigError::Home(e.to_string()))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(mirror_home()?.join(CONFIG_FILE))
}

fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Arguments for the config command
#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    /// Write the effective configuration to the config file if it does not exist
    #[arg(long)]
    pub init: bool,

    #[arg(long)]
    pub json: bool,
}

/// Show resolved paths and sync settings
pub fn run(ctx: &crate::cli::CliContext, args: ConfigArgs) -> anyhow::Result<()> {
    if args.init {
        if ctx.config_path.exists() {
            println!("Config already exists: {}", ctx.config_path.display());
        } else {
            ctx.config.save(&ctx.config_path)?;
            println!("Wrote {}", ctx.config_path.display());
        }
    }

    if args.json {
        let output = serde_json::json!({
            "config": {
                "path": ctx.config_path.to_string_lossy(),
                "exists": ctx.config_path.exists(),
            },
            "database": {
                "path": ctx.database.to_string_lossy(),
                "exists": ctx.database.exists(),
            },
            "sync": ctx.config.sync,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let sync = &ctx.config.sync;
    println!("CATALOG MIRROR CONFIGURATION");
    println!("============================");
    println!();
    println!(
        "Config:   {} ({})",
        ctx.config_path.display(),
        if ctx.config_path.exists() { "exists" } else { "defaults" }
    );
    println!(
        "Replica:  {} ({})",
        ctx.database.display(),
        if ctx.database.exists() { "exists" } else { "not found" }
    );
    println!();
    println!("Sync interval:       {}s", sync.interval_secs);
    println!("Full pass every:     {} ticks", sync.full_sync_every);
    println!("Page size:           {}", sync.page_size);
    println!("Concurrent units:    {}", sync.max_concurrent_units);
    println!("Request timeout:     {}s", sync.request_timeout_secs);
    let kinds: Vec<&str> = sync.required_kinds.iter().map(EntityKind::as_str).collect();
    println!("Required kinds:      {}", kinds.join(", "));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = MirrorConfig::default();
        assert!(config.database_path.is_none());
        assert_eq!(config.sync.interval_secs, 300);
        assert_eq!(config.sync.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.sync.full_sync_every, 12);
        assert_eq!(config.sync.required_kinds.len(), EntityKind::ALL.len());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = MirrorConfig::load_or_default(&temp.path().join("absent.toml")).unwrap();
        assert_eq!(config, MirrorConfig::default());
    }

    #[test]
    fn test_load_partial_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
database_path = "data/replica.db"

[sync]
interval_secs = 60
required_kinds = ["scene", "tag"]
"#,
        )
        .unwrap();

        let config = MirrorConfig::load(&path).unwrap();
        assert_eq!(config.sync.interval_secs, 60);
        assert_eq!(config.sync.page_size, DEFAULT_PAGE_SIZE); // Default
        assert_eq!(
            config.sync.required_kinds,
            vec![EntityKind::Scene, EntityKind::Tag]
        );
        assert_eq!(
            config.resolve_database(temp.path()),
            temp.path().join("data/replica.db")
        );
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE);
        std::fs::write(&path, "[sync\ninterval_secs = ").unwrap();
        assert!(matches!(MirrorConfig::load(&path), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join(CONFIG_FILE);
        let mut config = MirrorConfig::default();
        config.sync.max_concurrent_units = 9;
        config.database_path = Some(PathBuf::from("/srv/mirror/replica.db"));

        config.save(&path).unwrap();
        let loaded = MirrorConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.resolve_database(temp.path()),
            PathBuf::from("/srv/mirror/replica.db")
        );
    }

    #[test]
    fn test_default_database_under_home() {
        let home = Path::new("/tmp/mirror-home");
        assert_eq!(
            MirrorConfig::default().resolve_database(home),
            home.join(DATABASE_FILE)
        );
    }
}
