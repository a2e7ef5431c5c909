//! asset-migrate CLI - Resumable parallel migration of object-store assets.

use asset_migrate::error::{EXIT_FAILURES_ABOVE_TOLERANCE, EXIT_SUCCESS};
use asset_migrate::{Config, Ledger, MigrateError, MigrationResult, StoreMigration};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Failed paths printed in the text summary before truncating.
const MAX_FAILED_SHOWN: usize = 20;

#[derive(Parser)]
#[command(name = "asset-migrate")]
#[command(about = "Resumable parallel migration of assets between object stores")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate every pending asset, or only one collection
    Run {
        /// Collection to migrate (e.g. a manga slug); all collections if omitted
        collection: Option<String>,

        /// Override number of workers
        #[arg(long)]
        workers: Option<usize>,

        /// Override the soft time budget in seconds
        #[arg(long)]
        budget_secs: Option<u64>,

        /// Override the drain grace period in seconds
        #[arg(long)]
        grace_secs: Option<u64>,

        /// Dry run: list and compare with the ledger without transferring
        #[arg(long)]
        dry_run: bool,

        /// Ignore a cached inventory and list the source again
        #[arg(long)]
        refresh_inventory: bool,
    },

    /// Summarize the migration ledger
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, MigrateError> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli.verbosity, &cli.log_format, cli.output_json)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            collection,
            workers,
            budget_secs,
            grace_secs,
            dry_run,
            refresh_inventory,
        } => {
            // Apply overrides
            if let Some(w) = workers {
                config.migration.workers = Some(w);
            }
            if let Some(secs) = budget_secs {
                config.migration.time_budget_secs = Some(secs);
            }
            if let Some(secs) = grace_secs {
                config.migration.grace_period_secs = Some(secs);
            }
            config.validate()?;

            let run_config = config.run_config(collection.as_deref())?;
            let orchestrator = StoreMigration::from_config(&config, run_config)?
                .with_refresh_inventory(refresh_inventory);

            // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
            let cancel_token = setup_signal_handler().await?;

            let result = orchestrator.run(cancel_token, dry_run).await?;
            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_summary(&result);
            }

            if result.exceeds_tolerance(config.migration.failure_tolerance) {
                warn!(
                    "{} assets failed, more than the tolerated {}",
                    result.failed,
                    config.migration.failure_tolerance.unwrap_or(0)
                );
                return Ok(EXIT_FAILURES_ABOVE_TOLERANCE);
            }
        }
        Commands::Status => {
            let ledger = Ledger::new(&config.migration.ledger_path);
            let snapshot = ledger.load().await?;
            let summary = snapshot.summary();

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Ledger: {:?}", ledger.path());
                println!("  Paths: {}", summary.paths);
                println!("  Success: {}", summary.success);
                println!("  Skipped: {}", summary.skipped);
                println!("  Failed: {}", summary.failed);
                if snapshot.malformed_rows > 0 {
                    println!("  Malformed rows ignored: {}", snapshot.malformed_rows);
                }
                print_failed_paths(&summary.failed_paths);
            }
        }
    }

    Ok(EXIT_SUCCESS)
}

fn print_summary(result: &MigrationResult) {
    let status_msg = match (result.dry_run, result.status.as_str()) {
        (true, _) => "Dry run completed!",
        (false, "drained") => "Migration stopped at the time budget; re-run to continue.",
        (false, "cancelled") => "Migration cancelled; re-run to continue.",
        _ => "Migration completed!",
    };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!(
        "  Assets: {} listed, {} already migrated, {} pending{}",
        result.listed,
        result.already_resolved,
        result.pending,
        if result.partial_inventory {
            " (partial inventory)"
        } else {
            ""
        }
    );
    if result.dry_run {
        return;
    }
    println!(
        "  Results: {} ok, {} skipped, {} failed",
        result.succeeded, result.skipped, result.failed
    );
    if result.not_dispatched > 0 || result.aborted_in_flight > 0 {
        println!(
            "  Left for next run: {} not started, {} aborted",
            result.not_dispatched, result.aborted_in_flight
        );
    }
    println!(
        "  Data: {:.2} MB",
        result.bytes_transferred as f64 / 1_048_576.0
    );
    println!("  Throughput: {:.1} assets/min", result.items_per_minute);
    print_failed_paths(&result.failed_paths);
}

fn print_failed_paths(paths: &[String]) {
    if paths.is_empty() {
        return;
    }
    println!("  Failed assets:");
    for path in paths.iter().take(MAX_FAILED_SHOWN) {
        println!("    {}", path);
    }
    if paths.len() > MAX_FAILED_SHOWN {
        println!("    ... and {} more", paths.len() - MAX_FAILED_SHOWN);
    }
}

/// Progress, checkpoint and summary lines go to stdout. With `--output-json`
/// they move to stderr so stdout carries only the JSON result.
fn setup_logging(verbosity: &str, format: &str, to_stderr: bool) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let writer = if to_stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(writer);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM (CI job cancellation).
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!("\nReceived {}. Draining in-flight transfers...", name);
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Draining in-flight transfers...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
