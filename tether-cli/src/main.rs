use clap::Parser;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version,
    about = "Scan Unity projects and answer asset dependency questions"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Default log filter from the `-q`/`-v` flags; `RUST_LOG` wins when set.
fn verbosity_filter(quiet: bool, verbose: u8) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Classify an error into a process exit code.
///
/// Exit codes:
///   0 — success
///   1 — I/O or general failure
///   2 — configuration / init error
///   3 — fatal parse failure
///   4 — query target not found
///   5 — cycles found (with --fail-on-cycle)
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    let lower = format!("{err:#}").to_lowercase();

    if lower.contains("cycles found") {
        5
    } else if lower.contains("not found") && !lower.contains("config") {
        4
    } else if lower.contains("parse") {
        3
    } else if lower.contains("config") || lower.contains("already exists") || lower.contains("not initialized") {
        2
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(verbosity_filter(cli.quiet, cli.verbose));

    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build async runtime: {e}"))
        .and_then(|runtime| runtime.block_on(commands::run(cli.command)));

    if let Err(err) = outcome {
        eprintln!("Error: {err:#}");
        std::process::exit(classify_exit_code(&err));
    }
}
