//! LAPSE Server Binary
//!
//! Accepts activity pings over TCP and stops idle workspaces.

use clap::{Parser, ValueEnum};
use lapse::storage::JournalSync;
use lapse::{CommandStopCoordinator, Config, LogOnlyStopCoordinator, Service, StopCoordinator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SyncArg {
    Flush,
    Fsync,
}

/// LAPSE Server - Workspace Idle Expiration
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Port number
    #[arg(short, long, default_value_t = 7460)]
    port: u16,

    /// Sweep interval in seconds
    #[arg(long, default_value_t = 30)]
    sweep_interval: u64,

    /// Default idle timeout in seconds
    #[arg(long, default_value_t = 1800)]
    idle_timeout: u64,

    /// Per-workspace stop timeout in seconds
    #[arg(long, default_value_t = 60)]
    stop_timeout: u64,

    /// Stop requests allowed to run at once
    #[arg(long, default_value_t = 16)]
    max_concurrent_stops: usize,

    /// Command run to stop a workspace; the id is appended as last argument.
    /// Without it stops are only logged.
    #[arg(long)]
    stop_command: Option<String>,

    /// Journal file for durable expirations (in-memory when omitted)
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Journal sync mode
    #[arg(long, value_enum, default_value_t = SyncArg::Flush)]
    journal_sync: SyncArg,

    /// Journal records before a rewrite is considered
    #[arg(long, default_value_t = 100_000)]
    rewrite_threshold: usize,

    /// Store shards (0 = auto-detect based on CPU cores)
    #[arg(long, default_value_t = 0)]
    shards: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lapse=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = Config::default()
        .with_bind(&args.bind)
        .with_port(args.port)
        .with_sweep_interval(Duration::from_secs(args.sweep_interval))
        .with_idle_timeout(Duration::from_secs(args.idle_timeout))
        .with_stop_timeout(Duration::from_secs(args.stop_timeout))
        .with_max_concurrent_stops(args.max_concurrent_stops)
        .with_rewrite_threshold(args.rewrite_threshold)
        .with_shard_amount(args.shards);

    if let Some(path) = &args.journal {
        let sync = match args.journal_sync {
            SyncArg::Flush => JournalSync::Flush,
            SyncArg::Fsync => JournalSync::Fsync,
        };
        config = config.with_journal(path.clone(), sync);
    }

    let coordinator: Arc<dyn StopCoordinator> = match args
        .stop_command
        .as_deref()
        .and_then(CommandStopCoordinator::from_command_line)
    {
        Some(command) => Arc::new(command),
        None => {
            info!("No stop command configured, stops will only be logged");
            Arc::new(LogOnlyStopCoordinator)
        }
    };

    info!(
        "Starting LAPSE on {}:{} (sweep every {}s, idle timeout {}s)",
        args.bind, args.port, args.sweep_interval, args.idle_timeout
    );

    let service = Service::start(config, coordinator).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    service.shutdown().await?;

    Ok(())
}
