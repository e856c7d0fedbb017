//! sqlite-pg-migrate CLI - SQLite to PostgreSQL schema and data migration.

use clap::{Parser, Subcommand};
use sqlite_pg_migrate::{Config, MigrateError, MigrationReport, Orchestrator, RunStatus};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "sqlite-pg-migrate")]
#[command(about = "SQLite to PostgreSQL schema and data migration")]
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
    /// Run the migration
    Run {
        /// Render the DDL without changing the target or copying rows
        #[arg(long)]
        dry_run: bool,

        /// Override rows per insert transaction
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,
    },

    /// Validate row counts between source and target
    Validate,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            dry_run,
            batch_size,
            target_schema,
        } => {
            if let Some(size) = batch_size {
                if size == 0 {
                    return Err(MigrateError::Config(
                        "--batch-size must be at least 1".to_string(),
                    ));
                }
                config.migration.batch_size = size;
            }
            if let Some(schema) = target_schema {
                config.target.schema = schema;
            }
            config.validate()?;

            let cancel_token = setup_signal_handler()?;
            let orchestrator = Orchestrator::new(config).await?;
            let report = orchestrator.run(cancel_token, dry_run).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print_summary(&report);
            }

            if report.status == RunStatus::Cancelled {
                return Err(MigrateError::Cancelled);
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config).await?;
            let results = orchestrator.validate().await;
            orchestrator.close().await;
            let results = results?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            }

            let mismatched: Vec<&String> = results
                .iter()
                .filter(|(_, check)| !check.matches)
                .map(|(table, _)| table)
                .collect();
            if !mismatched.is_empty() {
                return Err(MigrateError::Config(format!(
                    "Row counts differ for: {}",
                    mismatched
                        .iter()
                        .map(|t| t.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
            if !cli.output_json {
                println!("Validation completed successfully");
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await;
            orchestrator.close().await;
            let result = result?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (SQLite): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::Config("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

fn print_summary(report: &MigrationReport) {
    let totals = &report.totals;
    let status_msg = match report.status {
        RunStatus::DryRun => "Dry run completed!",
        RunStatus::Cancelled => "Migration cancelled.",
        RunStatus::CompletedWithErrors => "Migration completed with errors.",
        RunStatus::Completed => "Migration completed!",
    };

    println!("\n{}", status_msg);
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!("  Tables: {}/{}", totals.tables_created, totals.tables);
    println!(
        "  Primary keys: {} enforced, {} unique index fallbacks",
        totals.primary_keys_enforced, totals.primary_key_fallbacks
    );
    println!(
        "  Foreign keys: {} present, {} failed",
        totals.foreign_keys_present, totals.foreign_keys_failed
    );

    if report.status == RunStatus::DryRun {
        println!("\nPlanned DDL:");
        for sql in &report.planned_ddl {
            println!("  {};", sql);
        }
        return;
    }

    println!(
        "  Rows: {} of {} ({} failed)",
        totals.rows_transferred, totals.rows_read, totals.rows_failed
    );
    if !report.duplicates.is_empty() {
        println!("  Tables with duplicate keys:");
        for (table, summary) in &report.duplicates {
            println!("    {}: {} groups", table, summary.groups);
        }
    }
    let failed: Vec<&str> = report
        .tables
        .iter()
        .filter(|t| t.has_errors())
        .map(|t| t.source_name.as_str())
        .collect();
    if !failed.is_empty() {
        println!("  Tables with errors: {:?}", failed);
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT or SIGTERM.
///
/// The run stops between batches and still writes its report.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!("\nReceived {}. Stopping after the current batch...", name);
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
