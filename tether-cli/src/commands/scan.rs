use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use tracing::info;

use tether_core::pipeline::{ScanOptions, ScanSession};
use tether_core::progress::IndicatifReporter;

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Unity project root (default: current directory)
    #[arg(default_value = ".")]
    pub project_root: PathBuf,

    /// Reprocess every file, ignoring the signature cache
    #[arg(long, conflicts_with = "incremental")]
    pub full: bool,

    /// Only reprocess changed files (the default)
    #[arg(long)]
    pub incremental: bool,

    /// Restrict the scan to these roots (repeatable)
    #[arg(long = "path")]
    pub paths: Vec<String>,
}

pub async fn run(args: ScanArgs) -> anyhow::Result<()> {
    let (root, config, store) = super::open_project(&args.project_root)?;

    let mut session = ScanSession::with_store(&root, config, &store)
        .await
        .context("Cannot load persisted graph")?;

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping at the next file boundary");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let opts = ScanOptions {
        full: args.full,
        paths: if args.paths.is_empty() {
            None
        } else {
            Some(args.paths.clone())
        },
    };
    let progress = IndicatifReporter::new();
    let report = session
        .scan(&store, &opts, &progress, cancel)
        .await
        .context("Scan failed")?;

    println!(
        "Scanned {} in {:.2}s{}",
        root.display(),
        report.duration_ms as f64 / 1000.0,
        if report.cancelled { " (cancelled)" } else { "" }
    );
    println!();
    println!("  Files walked:    {}", report.files_walked);
    println!(
        "  Changes:         {} new, {} modified, {} deleted, {} unchanged",
        report.files_new, report.files_modified, report.files_deleted, report.files_unchanged
    );
    println!("  Nodes upserted:  {}", report.nodes_upserted);
    println!(
        "  Edges:           +{} / -{}",
        report.edges_added, report.edges_removed
    );
    println!(
        "  Transactions:    {} committed, {} failed",
        report.transactions_committed, report.transactions_failed
    );

    if !report.skipped_large.is_empty() {
        println!("  Skipped (size):  {}", report.skipped_large.len());
    }
    if !report.resolve_warnings.is_empty() {
        println!("  Unresolved refs: {}", report.resolve_warnings.len());
    }
    if report.error_count() > 0 {
        println!();
        println!("  Errors ({}):", report.error_count());
        for (kind, count) in report.parse_errors_by_kind() {
            println!("    parse/{kind}: {count}");
        }
        if !report.io_errors.is_empty() {
            println!("    io: {}", report.io_errors.len());
        }
    }
    Ok(())
}
