//! `scanvault` – ScanVault command line interface.
//!
//! 1. Loads `~/.scanvault/config.toml` (defaults when absent) and applies
//!    `SCANVAULT_*` environment overrides.
//! 2. `record` ingests sensor messages until the source closes or Ctrl-C
//!    raises the shutdown flag, then flushes and prints a summary.
//! 3. `analyze`, `export`, `scans` and `info` read the recorded scans;
//!    `db` maintains the database; `config` manages the config file.
//!
//! Errors are printed as `error: …` on stderr with a failure exit status.

mod commands;
mod config;
mod telemetry;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use scanvault_types::now_epoch_secs;
use tracing::warn;

use commands::{CliError, Result};

#[derive(Parser, Debug)]
#[command(name = "scanvault", version, about = "Record, store and analyse polar range scans")]
struct Cli {
    /// Config file (default: ~/.scanvault/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding `data_dir`/`db_filename`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest sensor messages into the database.
    Record {
        /// Read newline-delimited JSON messages from stdin instead of the
        /// WebSocket source.
        #[arg(long)]
        stdin: bool,
    },
    /// Reconstruct and segment a stored scan.
    Analyze {
        /// Scan timestamp (default: latest).
        #[arg(long)]
        timestamp: Option<f64>,
        #[arg(long)]
        no_filter: bool,
        #[arg(long)]
        no_ground: bool,
        #[arg(long)]
        no_cluster: bool,
        /// Print the full result, scene included, as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List recent scan timestamps.
    Scans {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Summarise the database.
    Info,
    /// Write a scan's point cloud as ASCII PLY.
    Export {
        #[arg(short, long)]
        output: PathBuf,
        /// Scan timestamp (default: latest).
        #[arg(long)]
        timestamp: Option<f64>,
    },
    /// Database maintenance.
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    /// Manage the config file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum DbAction {
    /// Run an integrity check and print table sizes.
    Check,
    /// Rebuild the file to reclaim space.
    Vacuum,
    /// Refresh query planner statistics.
    Optimize,
    /// Delete scans older than the given number of days.
    Prune {
        #[arg(long)]
        days: u32,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a default config file.
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration.
    Show,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = telemetry::init_tracing("scanvault");
    // Returning lets the guard drop and flush spans on the error path too.
    report(run(cli), &mut std::io::stderr())
}

/// Print a failed run as `error: …` and map it to the exit status.
fn report(result: Result<()>, err: &mut dyn Write) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let _ = writeln!(err, "{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(config::config_path);
    let mut cfg = config::effective(&config_path).map_err(CliError::Config)?;
    let db_path = cli.db.clone().unwrap_or_else(|| cfg.ingest.db_path());
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Record { stdin } => {
            let shutdown = install_ctrlc_handler();
            let runtime = tokio::runtime::Runtime::new()?;
            let summary =
                runtime.block_on(commands::record(&cfg, &db_path, stdin, shutdown));
            // A pending stdin read must not keep the process alive.
            runtime.shutdown_timeout(Duration::from_secs(1));
            commands::print_recorder_summary(&summary?, &mut out)?;
        }
        Command::Analyze {
            timestamp,
            no_filter,
            no_ground,
            no_cluster,
            json,
        } => {
            cfg.pipeline.filter_outliers &= !no_filter;
            cfg.pipeline.segment_ground &= !no_ground;
            cfg.pipeline.cluster_objects &= !no_cluster;
            let store = commands::open_existing(&db_path)?;
            commands::analyze(store, &cfg.pipeline, timestamp, json, &mut out)?;
        }
        Command::Scans { limit } => {
            let store = commands::open_existing(&db_path)?;
            commands::scans(&store, limit, &mut out)?;
        }
        Command::Info => {
            let store = commands::open_existing(&db_path)?;
            commands::info(&store, &db_path, &mut out)?;
        }
        Command::Export { output, timestamp } => {
            let store = commands::open_existing(&db_path)?;
            commands::export(&store, timestamp, &output, &mut out)?;
        }
        Command::Db { action } => {
            let mut store = commands::open_existing(&db_path)?;
            match action {
                DbAction::Check => commands::db_check(&store, &mut out)?,
                DbAction::Vacuum => commands::db_vacuum(&mut store, &mut out)?,
                DbAction::Optimize => commands::db_optimize(&mut store, &mut out)?,
                DbAction::Prune { days } => {
                    commands::db_prune(&mut store, days, now_epoch_secs(), &mut out)?
                }
            }
        }
        Command::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_init(&config_path, force, &mut out)?,
            ConfigAction::Show => commands::config_show(&cfg, &config_path, &mut out)?,
        },
    }
    out.flush()?;
    Ok(())
}

/// Raise the returned flag on Ctrl-C so ingestion can stop and flush.
fn install_ctrlc_handler() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("{}", "⚠  Ctrl-C received – flushing and shutting down …".yellow().bold());
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }
    shutdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_analyze_flags() {
        let cli = Cli::try_parse_from([
            "scanvault", "analyze", "--timestamp", "1700000000.5", "--no-ground", "--json",
        ])
        .unwrap();
        match cli.command {
            Command::Analyze {
                timestamp,
                no_filter,
                no_ground,
                no_cluster,
                json,
            } => {
                assert_eq!(timestamp, Some(1_700_000_000.5));
                assert!(!no_filter && no_ground && !no_cluster && json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_db_prune_with_global_db() {
        let cli =
            Cli::try_parse_from(["scanvault", "db", "prune", "--days", "7", "--db", "/tmp/x.db"])
                .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        assert!(matches!(
            cli.command,
            Command::Db {
                action: DbAction::Prune { days: 7 }
            }
        ));
    }

    #[test]
    fn scans_limit_defaults_to_twenty() {
        let cli = Cli::try_parse_from(["scanvault", "scans"]).unwrap();
        assert!(matches!(cli.command, Command::Scans { limit: 20 }));
    }

    #[test]
    fn export_requires_an_output() {
        assert!(Cli::try_parse_from(["scanvault", "export"]).is_err());
        let cli = Cli::try_parse_from(["scanvault", "export", "-o", "scan.ply"]).unwrap();
        assert!(matches!(cli.command, Command::Export { timestamp: None, .. }));
    }

    #[test]
    fn failed_run_is_reported_with_failure_status() {
        colored::control::set_override(false);
        let mut err = Vec::new();
        let code = report(Err(CliError::NotFound("no scan with timestamp 4".into())), &mut err);
        assert_eq!(code, ExitCode::FAILURE);
        assert_eq!(String::from_utf8(err).unwrap(), "error: no scan with timestamp 4\n");

        let mut err = Vec::new();
        assert_eq!(report(Ok(()), &mut err), ExitCode::SUCCESS);
        assert!(err.is_empty());
    }

    #[test]
    fn prune_requires_days() {
        assert!(Cli::try_parse_from(["scanvault", "db", "prune"]).is_err());
    }
}
