//! terminal-refresh: derive terminal capabilities from reported attempts.
//!
//! Operates on a SQLite terminal store. Results are printed to stdout as
//! JSON; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use terminal_capability::Attempt;
use terminal_refresh::{RefreshConfig, Refresher, SqliteStore, TerminalStore};

#[derive(Parser)]
#[command(name = "terminal-refresh")]
#[command(about = "Derive payment terminal capabilities from crowd-sourced attempts")]
struct Cli {
    /// Path to the SQLite terminal store
    #[arg(long, env = "TERMINAL_REFRESH_DB", default_value = "terminals.db")]
    db: PathBuf,

    /// Identity recorded as the refreshing actor
    #[arg(long, env = "TERMINAL_REFRESH_ACTOR", default_value = "system")]
    actor: String,

    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh specific terminals
    Refresh {
        /// Terminal IDs
        #[arg(required = true)]
        terminal_ids: Vec<String>,

        /// Print the derived state without writing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Refresh every terminal in the store
    Sweep,

    /// Print a stored terminal
    Show {
        /// Terminal ID
        terminal_id: String,
    },

    /// Load attempts from a JSON array, creating missing terminals
    Ingest {
        /// JSON file of attempts
        file: PathBuf,

        /// Refresh the affected terminals afterwards
        #[arg(long)]
        refresh: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("terminal_refresh=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RefreshConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RefreshConfig::default(),
    };

    let store = Arc::new(SqliteStore::open(&cli.db)?);
    let refresher = Refresher::with_config(store.clone(), config);

    match cli.command {
        Commands::Refresh {
            terminal_ids,
            dry_run,
        } => {
            if dry_run {
                let mut snapshots = Vec::with_capacity(terminal_ids.len());
                for terminal_id in &terminal_ids {
                    snapshots.push(refresher.preview_terminal(terminal_id).await?);
                }
                print_json(&snapshots)?;
            } else {
                let report = refresher.refresh_batch(&terminal_ids, &cli.actor).await;
                print_json(&report)?;
                if !report.is_clean() {
                    std::process::exit(1);
                }
            }
        }

        Commands::Sweep => {
            let report = refresher.refresh_all(&cli.actor).await?;
            print_json(&report)?;
            if !report.is_clean() {
                std::process::exit(1);
            }
        }

        Commands::Show { terminal_id } => {
            let terminal = store
                .get_terminal(&terminal_id)
                .await?
                .with_context(|| format!("terminal {} not found", terminal_id))?;
            print_json(&terminal)?;
        }

        Commands::Ingest { file, refresh } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let attempts: Vec<Attempt> = serde_json::from_str(&content)
                .with_context(|| format!("parsing attempts from {}", file.display()))?;

            let report = store.ingest_attempts(attempts).await?;
            info!(
                attempts = report.attempts.len(),
                terminals_created = report.terminals_created.len(),
                "Attempts ingested"
            );

            if refresh {
                let batch = refresher.refresh_batch(&report.terminals, &cli.actor).await;
                print_json(&batch)?;
                if !batch.is_clean() {
                    std::process::exit(1);
                }
            } else {
                print_json(&json!({
                    "ingested": report.attempts.len(),
                    "terminals_created": report.terminals_created,
                    "terminals": report.terminals,
                }))?;
            }
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
