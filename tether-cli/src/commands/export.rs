use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, ValueEnum};

use tether_core::store::AssetStore;
use tether_graphs::GraphDump;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
    Dot,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Unity project root (default: current directory)
    #[arg(default_value = ".")]
    pub project_root: PathBuf,

    /// Output format
    #[arg(long, value_enum)]
    pub format: ExportFormat,

    /// Output file
    #[arg(long)]
    pub output: PathBuf,
}

pub async fn run(args: ExportArgs) -> anyhow::Result<()> {
    let (_root, _config, store) = super::open_project(&args.project_root)?;
    let dump = store.load_graph().await.context("Cannot load graph")?;

    let rendered = match args.format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(&dump).context("Cannot serialize graph")?
        }
        ExportFormat::Csv => render_csv(&dump),
        ExportFormat::Dot => render_dot(&dump),
    };
    std::fs::write(&args.output, rendered)
        .with_context(|| format!("Cannot write {}", args.output.display()))?;

    println!(
        "Exported {} nodes and {} edges to {}",
        dump.nodes.len(),
        dump.edges.len(),
        args.output.display()
    );
    Ok(())
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn render_csv(dump: &GraphDump) -> String {
    let mut out = String::from("source_guid,target_guid,dep_kind,strength,context_path,active\n");
    for edge in &dump.edges {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{}",
            edge.source,
            edge.target,
            edge.dep_kind,
            edge.strength,
            csv_escape(edge.context_path.as_deref().unwrap_or("")),
            edge.active
        );
    }
    out
}

fn render_dot(dump: &GraphDump) -> String {
    let mut out = String::from("digraph assets {\n  rankdir=LR;\n  node [shape=box];\n");
    for node in &dump.nodes {
        let style = if node.active { "" } else { ", style=dashed" };
        let _ = writeln!(
            out,
            "  \"{}\" [label=\"{}\\n({})\"{}];",
            node.guid,
            node.path.replace('"', "\\\""),
            node.kind,
            style
        );
    }
    for edge in &dump.edges {
        let _ = writeln!(
            out,
            "  \"{}\" -> \"{}\" [label=\"{}\"];",
            edge.source, edge.target, edge.dep_kind
        );
    }
    out.push_str("}\n");
    out
}
