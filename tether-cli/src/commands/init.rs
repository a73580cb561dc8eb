use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use tether_core::config::TetherConfig;
use tether_core::store::SqliteStore;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Unity project root (default: current directory)
    #[arg(default_value = ".")]
    pub project_root: PathBuf,
}

pub async fn run(args: InitArgs) -> anyhow::Result<()> {
    let root = std::fs::canonicalize(&args.project_root)
        .with_context(|| format!("Cannot resolve path: {}", args.project_root.display()))?;

    let config_path = TetherConfig::write_default(&root).context("Cannot write config")?;
    let config = TetherConfig::default();
    let db_path = config.db_path(&root);
    SqliteStore::open(&db_path)
        .with_context(|| format!("Cannot create database: {}", db_path.display()))?;

    println!("Initialized tether in {}", root.display());
    println!("  Config: {}", config_path.display());
    println!("  Store:  {}", db_path.display());
    println!();
    println!("Run `tether scan` to build the dependency graph.");
    Ok(())
}
