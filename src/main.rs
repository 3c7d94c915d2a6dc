//! hibernatord - idle monitoring and hibernation daemon.
//!
//! Watches user sessions via logind and hibernates the machine once an idle
//! condition has held long enough, warning connected users first.

use anyhow::{Context, Result};
use clap::Parser;
use hibernatord::config::Config;
use hibernatord::daemon::Daemon;
use hibernatord::hibernate::LogindPower;
use hibernatord::relay::RelayManager;
use hibernatord::session::{self, LogindSource};
use std::path::PathBuf;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Idle monitoring and hibernation daemon.
///
/// Hibernates the machine when no one is using it, after warning any
/// connected users.
#[derive(Parser, Debug)]
#[command(name = "hibernatord")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable dry-run mode (don't actually request hibernation).
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run a single evaluation cycle, print the result, and exit.
    #[arg(long)]
    oneshot: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("hibernatord v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;

    if args.dry_run {
        config.dry_run = true;
    }
    config.validate().context("Invalid configuration")?;

    info!("Configuration loaded (dry_run={})", config.dry_run);

    let source = LogindSource::connect()
        .await
        .context("Failed to connect to logind")?;
    let channel = RelayManager::new(config.relay_path.clone())
        .context("Failed to initialize relay manager")?;
    let power = LogindPower::new(config.dry_run);

    if args.oneshot {
        return run_oneshot(config, source, channel, power).await;
    }

    run_daemon(config, source, channel, power).await
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("hibernatord={}", level))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

/// Evaluate one cycle and print the decision without acting on it.
async fn run_oneshot(
    config: Config,
    source: LogindSource,
    channel: RelayManager,
    power: LogindPower,
) -> Result<()> {
    let mut daemon = Daemon::new(config, source, channel, power);
    let result = daemon.check_once().await?;

    println!("condition: {}", result.condition.as_str());
    println!("should_warn: {}", result.should_warn);
    println!("should_hibernate: {}", result.should_hibernate);
    if !result.reason.is_empty() {
        println!("reason: {}", result.reason);
    }
    println!("time_remaining: {:?}", result.time_remaining);
    Ok(())
}

/// Run the monitor loop until SIGTERM or Ctrl-C.
async fn run_daemon(
    config: Config,
    source: LogindSource,
    channel: RelayManager,
    power: LogindPower,
) -> Result<()> {
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("SIGTERM received"),
                    _ = tokio::signal::ctrl_c() => info!("Interrupt received"),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Interrupt received");
            }
        }
        signal_token.cancel();
    });

    // Resume events reach the engine through the daemon task, never
    // concurrently with an evaluation.
    let (resume_tx, resume_rx) = mpsc::channel(4);
    tokio::spawn(async move {
        if let Err(e) = session::watch_resume(resume_tx).await {
            warn!("Resume watcher unavailable: {}", e);
        }
    });

    let daemon = Daemon::new(config, source, channel, power);
    daemon.run(shutdown, resume_rx).await
}
