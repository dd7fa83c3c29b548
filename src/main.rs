//! index-rss-watcher: polls an index-announcement feed and sends an alert
//! for every new matching entry.
//!
//! Configuration comes from the environment (optionally seeded from a
//! `.env` file); see [`index_rss_watcher::Config`]. The process runs until
//! SIGINT or SIGTERM and exits non-zero only when it cannot start.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use index_rss_watcher::{
    logging, Config, FeedFetcher, Filter, Notifier, SeenStore, Watcher,
};

/// How long an in-flight notification may take to finish after a shutdown
/// signal before the process exits anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(20);

#[derive(Parser)]
#[command(name = "index-rss-watcher", version)]
#[command(about = "Send an SMS or voice alert for new index-change announcements")]
struct Cli {
    /// Load environment variables from this file instead of `./.env`
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Check that the feed is reachable and credentials are present, then exit
    #[arg(long)]
    check: bool,

    /// Run a single poll cycle and exit
    #[arg(long, conflicts_with = "check")]
    once: bool,

    /// Log alerts instead of sending them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // -- environment ---------------------------------------------------------
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let mut config = Config::from_env().context("invalid configuration")?;
    if cli.dry_run {
        config.notify.dry_run = true;
    }
    logging::init(&config.log_level);

    // -- components ----------------------------------------------------------
    let filter = Filter::new(&config.filter).context("invalid filter configuration")?;
    let fetcher =
        FeedFetcher::new(config.fetch_settings()).context("failed to create HTTP client")?;
    let notifier = Notifier::new(config.notify.clone());

    if cli.check {
        return check(&fetcher, &notifier).await;
    }

    // The store is the one fatal startup precondition.
    let store = SeenStore::open(&config.db_path).with_context(|| {
        format!("failed to open dedup store at {}", config.db_path.display())
    })?;

    let mut watcher = Watcher::new(
        Box::new(fetcher),
        filter,
        store,
        notifier,
        config.watch_settings(),
    );

    if cli.once {
        let delay = watcher.run_cycle().await;
        info!(
            report = ?watcher.last_report(),
            next_delay_secs = delay.as_secs(),
            "single cycle complete"
        );
        return Ok(());
    }

    // -- run until signalled -------------------------------------------------
    let cancel = CancellationToken::new();
    let mut task = tokio::spawn({
        let cancel = cancel.clone();
        async move { watcher.run(cancel).await }
    });

    tokio::select! {
        joined = &mut task => joined.context("watcher task failed")?,
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            cancel.cancel();
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(joined) => joined.context("watcher task failed")?,
                Err(_) => warn!(
                    grace_secs = SHUTDOWN_GRACE.as_secs(),
                    "watcher did not stop within the grace period"
                ),
            }
        }
    }

    Ok(())
}

/// Probe every candidate URL and the notification credentials.
async fn check(fetcher: &FeedFetcher, notifier: &Notifier) -> Result<()> {
    let mut reachable = 0;
    for report in fetcher.probe().await {
        match report.outcome {
            Ok(count) => {
                reachable += 1;
                info!(url = %report.url, entries = count, "feed reachable");
            }
            Err(failure) => {
                warn!(url = %report.url, class = %failure.kind, error = %failure.message, "feed unreachable");
            }
        }
    }

    match notifier.check_credentials().await {
        Ok(()) => info!(mode = ?notifier.mode(), "notification provider configured"),
        Err(err) => warn!(error = %err, "notification provider not configured"),
    }

    if reachable == 0 {
        bail!("no candidate feed URL is reachable");
    }
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
