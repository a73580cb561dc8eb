use std::path::PathBuf;

use clap::Args;

use tether_graphs::{AssetKind, QueryOptions, UnusedFilter};

#[derive(Args, Debug)]
pub struct FindUnusedArgs {
    /// Unity project root (default: current directory)
    #[arg(default_value = ".")]
    pub project_root: PathBuf,

    /// Only report these asset kinds (repeatable)
    #[arg(long = "kind")]
    pub kinds: Vec<String>,

    /// Include scene assets (normally treated as roots)
    #[arg(long)]
    pub include_scenes: bool,
}

pub async fn run(args: FindUnusedArgs) -> anyhow::Result<()> {
    let (_root, config, store) = super::open_project(&args.project_root)?;
    let graph = super::load_graph(&store).await?;
    let engine = super::query_engine(graph.clone(), &config);

    let kinds = if args.kinds.is_empty() {
        None
    } else {
        let parsed: Vec<AssetKind> = args
            .kinds
            .iter()
            .filter_map(|k| AssetKind::parse(k))
            .collect();
        if parsed.len() != args.kinds.len() {
            anyhow::bail!("Unknown asset kind in --kind (expected e.g. texture, prefab, material)");
        }
        Some(parsed)
    };

    let unused = engine.unused(
        &UnusedFilter {
            kinds,
            include_roots: args.include_scenes,
        },
        &QueryOptions::default(),
    )?;

    if unused.is_empty() {
        println!("No unused assets.");
        return Ok(());
    }
    println!("{} unused asset(s):", unused.len());
    let g = graph.read().expect("graph lock poisoned");
    for guid in &unused {
        if let Some(node) = g.node(guid) {
            println!("  {} ({}) [{}]", node.path, guid, node.kind);
        }
    }
    Ok(())
}
