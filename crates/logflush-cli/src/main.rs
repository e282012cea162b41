//! Logflush CLI
//!
//! Thin wrapper around logflush-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Record one entry and ship it to the default spool file
//! logflush log "Backup finished" --field duration_ms=5400
//!
//! # Ship to an HTTP collector instead
//! logflush --collector https://logs.example.com/v1/batch log "Deploy started" --level warn
//!
//! # Inspect what is still waiting for delivery
//! logflush count
//! logflush pending
//!
//! # Retry delivery now, or drop everything pending
//! logflush flush
//! logflush clear
//!
//! # Ship every line of a command's output
//! ./nightly-job.sh 2>&1 | logflush pipe --level info
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logflush_core::{
    CoordinatorConfig, CoordinatorEvent, DiskStore, FlushCoordinator, FlushError, FlushOutcome,
    HttpDelivery, LogLevel, SessionMetadata, SpoolDelivery,
};
use serde_json::{Map, Value};
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast::{self, error::TryRecvError};

/// Logflush - Buffered Log Shipping
#[derive(Parser)]
#[command(name = "logflush")]
#[command(version = "0.1.0")]
#[command(about = "Logflush - Buffered Log Shipping")]
#[command(
    long_about = "Buffers structured log entries in a durable local store and ships them to a collector in throttled batches."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.logflush/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON file with coordinator settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the sync interval from the config file
    #[arg(long, global = true)]
    sync_interval_ms: Option<u64>,

    /// HTTP collector endpoint
    #[arg(long, global = true, conflicts_with = "spool")]
    collector: Option<String>,

    /// JSONL spool file (default: <data-dir>/collector.jsonl)
    #[arg(long, global = true)]
    spool: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one entry, then deliver everything pending
    Log {
        /// Message text
        message: String,

        /// Severity (debug, info, warn, error)
        #[arg(short, long, default_value = "info")]
        level: LogLevel,

        /// Extra field as key=value (value parsed as JSON when possible)
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },

    /// Print the number of entries waiting for delivery
    Count,

    /// Print entries waiting for delivery as JSON lines
    Pending,

    /// Deliver pending entries now
    Flush,

    /// Drop all pending entries
    Clear,

    /// Record each line of stdin as an entry
    Pipe {
        /// Severity for every line
        #[arg(short, long, default_value = "info")]
        level: LogLevel,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default data directory (~/.logflush/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".logflush")
        .join("data")
}

/// Parse a `key=value` field
fn parse_field(s: &str) -> std::result::Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid field '{}'. Expected key=value", s))?;
    if key.is_empty() {
        return Err(format!("Invalid field '{}'. Key must not be empty", s));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn load_config(cli: &Cli) -> Result<CoordinatorConfig> {
    let mut config = match &cli.config {
        Some(path) => CoordinatorConfig::from_file(path)?,
        None => CoordinatorConfig::default(),
    };
    if let Some(ms) = cli.sync_interval_ms {
        config.sync_interval_ms = ms;
    }
    Ok(config)
}

/// Build a coordinator over the local store, restoring whatever a previous run left.
async fn open_coordinator(cli: &Cli, data_dir: &Path) -> Result<FlushCoordinator> {
    let store_path = data_dir.join("buffer.redb");
    let store = DiskStore::open(&store_path)
        .with_context(|| format!("Failed to open buffer store at {}", store_path.display()))?;

    let builder = FlushCoordinator::builder()
        .config(load_config(cli)?)
        .metadata(SessionMetadata::new("logflush"))
        .persistence(store);

    let builder = match &cli.collector {
        Some(url) => builder.delivery(HttpDelivery::new(url.clone())),
        None => {
            let spool_path = cli
                .spool
                .clone()
                .unwrap_or_else(|| data_dir.join("collector.jsonl"));
            let spool = SpoolDelivery::open(&spool_path)
                .with_context(|| format!("Failed to open spool file {}", spool_path.display()))?;
            builder.delivery(spool)
        }
    };

    builder
        .restore()
        .await
        .context("Failed to restore pending entries")
}

/// Total shipped by every sync of this run, including ones before shutdown.
fn delivered_count(events: &mut broadcast::Receiver<CoordinatorEvent>) -> usize {
    let mut total = 0;
    loop {
        match events.try_recv() {
            Ok(CoordinatorEvent::Delivered { count }) => total += count,
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return total,
        }
    }
}

/// Report a shutdown; delivery failures leave entries pending.
fn report_shutdown(
    events: &mut broadcast::Receiver<CoordinatorEvent>,
    outcome: std::result::Result<FlushOutcome, FlushError>,
) -> Result<()> {
    match outcome {
        Ok(_) => match delivered_count(events) {
            0 => println!("Nothing to deliver"),
            n => println!("Delivered {} entries", n),
        },
        Err(FlushError::DeliveryFailed(e)) => {
            println!("Delivery failed: {}", e);
            println!("Entries kept for the next run.");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let coordinator = open_coordinator(&cli, &data_dir).await?;

    match cli.command {
        Commands::Log {
            message,
            level,
            fields,
        } => {
            let data: Map<String, Value> = fields.into_iter().collect();
            let mut events = coordinator.subscribe();
            coordinator.append_at(level, &message, &data);
            println!("Recorded: {} {}", level, message);
            report_shutdown(&mut events, coordinator.shutdown().await)?;
        }

        Commands::Count => {
            println!("{}", coordinator.count());
        }

        Commands::Pending => {
            for entry in coordinator.entries().await {
                println!("{}", entry.to_json_line()?);
            }
        }

        Commands::Flush => match coordinator.flush().await {
            Ok(FlushOutcome::Delivered(n)) => println!("Delivered {} entries", n),
            Ok(FlushOutcome::Empty) => println!("Nothing to deliver"),
            Ok(FlushOutcome::AlreadySyncing) => println!("A delivery is already in progress"),
            Err(e) => {
                return Err(e).context(format!(
                    "{} entries kept for the next attempt",
                    coordinator.count()
                ))
            }
        },

        Commands::Clear => {
            let dropped = coordinator.count();
            coordinator.clear().await;
            println!("Cleared {} pending entries", dropped);
        }

        Commands::Pipe { level } => {
            let mut events = coordinator.subscribe();
            coordinator.start();

            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut lines = stdin.lines();
            let mut appended = 0usize;
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                coordinator.append_at(level, &line, &());
                appended += 1;
            }

            println!("Recorded {} lines", appended);
            report_shutdown(&mut events, coordinator.shutdown().await)?;
        }
    }

    Ok(())
}
