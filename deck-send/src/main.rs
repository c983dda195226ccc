//! deck-send - Background daemon that publishes due schedule rows
//!
//! Polls the database, hands due rows to the publish worker and keeps
//! running until SIGINT or SIGTERM.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libpostdeck::publisher::DryRunPublisher;
use libpostdeck::service::PostdeckService;
use libpostdeck::worker::PublishWorker;
use libpostdeck::PostdeckError;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "deck-send")]
#[command(version)]
#[command(about = "Background daemon that publishes scheduled posts")]
#[command(long_about = "\
deck-send - Background daemon that publishes scheduled posts

DESCRIPTION:
    deck-send polls the Postdeck database for pending schedule rows whose
    time has come and publishes them. At most max_concurrent_per_workspace
    jobs run at once for a workspace; the rest are pushed back by
    release_delay seconds and picked up on a later poll. Failed attempts
    are retried up to max_attempts times. A row left publishing by a
    crashed run goes back to the queue once throttle_window has passed.

    No platform client ships with Postdeck yet: rows are published with the
    dry-run publisher, which logs what would be sent.

USAGE:
    # Run in foreground (logs to stderr)
    deck-send

    # Poll every 10 seconds with debug logging
    deck-send --poll-interval 10 --verbose

    # Publish what is due right now and exit
    deck-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current round)

CONFIGURATION:
    Configuration file: ~/.config/postdeck/config.toml
    Database location: ~/.local/share/postdeck/postdeck.db

    [publishing]
    max_concurrent_per_workspace = 3
    throttle_window = 60   # seconds a throttle slot lives
    release_delay = 30     # seconds a throttled job waits
    max_attempts = 3
    retry_delay = 300      # seconds between attempts
    poll_interval = 60     # seconds between polls
    batch_size = 100       # due rows picked up per poll

    POSTDECK_LOG_FORMAT (text, json, pretty) and POSTDECK_LOG_LEVEL control
    log output.

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime or configuration error
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Process due posts once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libpostdeck::logging::init_from_env("info", cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<PostdeckError>()
            .map(PostdeckError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let service = PostdeckService::new()
        .await
        .context("Failed to start publishing service")?;

    let poll_interval = cli
        .poll_interval
        .unwrap_or(service.config().publishing.poll_interval)
        .max(1);
    let worker = service.worker(Arc::new(DryRunPublisher));

    info!("deck-send daemon starting");

    if cli.once {
        process_due(&worker).await?;
        info!("deck-send: processed due posts once, exiting");
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(Arc::clone(&shutdown))?;

    info!("Poll interval: {}s", poll_interval);
    run_daemon_loop(&worker, poll_interval, shutdown).await;

    info!("deck-send daemon stopped");
    Ok(())
}

/// Flip `shutdown` on SIGINT or SIGTERM
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use futures::stream::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;

    tokio::spawn(async move {
        if let Some(signal) = signals.next().await {
            info!(signal, "Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });
    Ok(())
}

async fn run_daemon_loop(worker: &PublishWorker, poll_interval: u64, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        if let Err(e) = process_due(worker).await {
            error!("Error processing due posts: {}", e);
        }

        // Sleep until the next poll, checking for shutdown every second
        for _ in 0..poll_interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}

async fn process_due(worker: &PublishWorker) -> libpostdeck::Result<()> {
    let now = chrono::Utc::now().timestamp();
    let summary = worker.run_due(now).await?;

    if summary.total() > 0 {
        info!(
            published = summary.published,
            deferred = summary.deferred,
            retrying = summary.retrying,
            failed = summary.failed,
            skipped = summary.skipped,
            errors = summary.errors,
            "Dispatch round finished"
        );
    }

    Ok(())
}
