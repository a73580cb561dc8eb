use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use tether_core::store::AssetStore;

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Unity project root (default: current directory)
    #[arg(default_value = ".")]
    pub project_root: PathBuf,

    /// Emit machine-readable JSON instead of the table
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: StatsArgs) -> anyhow::Result<()> {
    let (_root, _config, store) = super::open_project(&args.project_root)?;
    let stats = store.stats().await.context("Cannot read store stats")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Assets:       {} ({} active)", stats.total_assets, stats.active_assets);
    println!("Dependencies: {}", stats.total_dependencies);
    if stats.db_size_bytes > 0 {
        println!("Store size:   {} KiB", stats.db_size_bytes / 1024);
    }
    if !stats.assets_by_kind.is_empty() {
        println!();
        println!("By kind:");
        let mut kinds: Vec<_> = stats.assets_by_kind.iter().collect();
        kinds.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (kind, count) in kinds {
            println!("  {kind:<20} {count}");
        }
    }
    Ok(())
}
