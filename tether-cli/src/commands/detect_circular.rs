use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use tether_graphs::CycleAnalyzer;

#[derive(Args, Debug)]
pub struct DetectCircularArgs {
    /// Unity project root (default: current directory)
    #[arg(default_value = ".")]
    pub project_root: PathBuf,

    /// Write the full JSON report to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Exit nonzero when any cycle exists
    #[arg(long)]
    pub fail_on_cycle: bool,
}

pub async fn run(args: DetectCircularArgs) -> anyhow::Result<()> {
    let (_root, config, store) = super::open_project(&args.project_root)?;
    let graph = super::load_graph(&store).await?;

    let analyzer = CycleAnalyzer::new(graph.clone(), config.graph.max_cycle_length);
    let report = analyzer.analyze().context("Cycle analysis failed")?;

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report).context("Cannot serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Cannot write report: {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    if report.cycles.is_empty() {
        println!("No circular dependencies.");
        return Ok(());
    }

    println!(
        "{} cycle(s) across {} node(s), analyzed in {} ms",
        report.cycles.len(),
        report.affected_nodes.len(),
        report.analysis_time_ms
    );
    for (kind, count) in &report.counts_by_type {
        println!("  {kind}: {count}");
    }
    for (severity, count) in &report.counts_by_severity {
        println!("  {severity}: {count}");
    }

    let g = graph.read().expect("graph lock poisoned");
    for (i, cycle) in report.cycles.iter().enumerate().take(10) {
        let chain: Vec<String> = cycle
            .nodes
            .iter()
            .map(|guid| {
                g.node(guid)
                    .map_or_else(|| guid.to_string(), |n| n.path.clone())
            })
            .collect();
        println!();
        println!(
            "  #{:<2} [{}] {} (len {})",
            i + 1,
            cycle.severity.as_str(),
            chain.join(" -> "),
            cycle.length
        );
        for edge in &cycle.break_edges {
            println!(
                "      break candidate: {} -> {} ({}, {})",
                edge.source, edge.target, edge.dep_kind, edge.strength
            );
        }
    }
    if report.cycles.len() > 10 {
        println!("  ... and {} more (see --report)", report.cycles.len() - 10);
    }

    if args.fail_on_cycle {
        anyhow::bail!("cycles found: {}", report.cycles.len());
    }
    Ok(())
}
