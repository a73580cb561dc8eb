use std::path::PathBuf;

use clap::Args;

use tether_graphs::QueryOptions;

#[derive(Args, Debug)]
pub struct FindDepsArgs {
    /// Asset path or 32-hex GUID
    pub target: String,

    /// Unity project root (default: current directory)
    #[arg(long, default_value = ".")]
    pub project_root: PathBuf,

    /// Show what references the asset instead of what it depends on
    #[arg(long)]
    pub reverse: bool,

    /// Follow dependencies transitively
    #[arg(long)]
    pub recursive: bool,

    /// Depth cap for --recursive
    #[arg(long)]
    pub max_depth: Option<usize>,
}

pub async fn run(args: FindDepsArgs) -> anyhow::Result<()> {
    let (_root, config, store) = super::open_project(&args.project_root)?;
    let graph = super::load_graph(&store).await?;

    let guid = {
        let g = graph.read().expect("graph lock poisoned");
        super::resolve_target(&g, &args.target)
    };
    let Some(guid) = guid else {
        anyhow::bail!("Asset not found: {}", args.target);
    };

    let engine = super::query_engine(graph.clone(), &config);
    let opts = QueryOptions {
        max_depth: args.max_depth,
        ..Default::default()
    };

    let direction = if args.reverse { "referenced by" } else { "depends on" };
    {
        let g = graph.read().expect("graph lock poisoned");
        let node = g.node(&guid).expect("resolved GUID has a node");
        println!("{} ({}) {}:", node.path, guid, direction);
    }

    if args.recursive {
        let result = if args.reverse {
            engine.all_refs(&guid, &opts)?
        } else {
            engine.all_deps(&guid, &opts)?
        };
        if result.guids.is_empty() {
            println!("  (none)");
            return Ok(());
        }
        let g = graph.read().expect("graph lock poisoned");
        for target in &result.guids {
            let depth = result.depths.get(target).copied().unwrap_or(0);
            let path = g.node(target).map_or_else(String::new, |n| n.path.clone());
            println!("  [depth {depth}] {path} ({target})");
        }
    } else {
        let entries = if args.reverse {
            engine.direct_refs(&guid, &opts)?
        } else {
            engine.direct_deps(&guid, &opts)?
        };
        if entries.is_empty() {
            println!("  (none)");
            return Ok(());
        }
        for entry in entries {
            let context = entry
                .edge
                .context_path
                .as_deref()
                .map(|c| format!(" via {c}"))
                .unwrap_or_default();
            println!(
                "  {} ({}) [{} / {}]{}",
                entry.node.path, entry.node.guid, entry.edge.dep_kind, entry.edge.strength, context
            );
        }
    }
    Ok(())
}
