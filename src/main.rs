//! rankwatch - ranked progress tracker
//!
//! Usage:
//!   rankwatch --config rankwatch.toml [--once]
//!
//! Environment Variables:
//!   RIOT_API_KEY          - upstream API key (required)
//!   RIOT_REGION           - platform host, e.g. euw1
//!   RIOT_ROUTING          - regional host, e.g. europe
//!   DB_PATH               - SQLite database file
//!   POLL_INTERVAL_SECS    - seconds between poll cycles
//!   RANKWATCH_CONFIG_PATH - config file when --config is not given

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rankwatch::config::TrackerConfig;
use rankwatch::notify::TracingSink;
use rankwatch::shutdown::{self, ShutdownSignal};
use rankwatch::storage::SqliteStore;
use rankwatch::tracker::{PollScheduler, ReconcileEngine};
use rankwatch::upstream::{RateLimitedSource, RateLimiter, RiotClient};

#[derive(Parser, Debug)]
#[command(name = "rankwatch")]
#[command(about = "Polls ranked standings and reports what changed")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "RANKWATCH_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Run a single poll cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let args = Args::parse();
    let config = TrackerConfig::resolve(args.config.as_deref())?;
    config.validate()?;

    info!(
        platform = %config.riot.platform,
        routing = %config.riot.routing,
        database = %config.database_path,
        "🚀 rankwatch starting"
    );

    let store = Arc::new(
        SqliteStore::new(&config.database_path).context("Failed to open tracker database")?,
    );
    let limiter = Arc::new(RateLimiter::new(config.rate_limiter()));
    let client = RiotClient::new(config.riot_client())?;
    let source = Arc::new(RateLimitedSource::new(client, limiter));

    let engine = Arc::new(ReconcileEngine::new(
        source,
        store,
        Arc::new(TracingSink),
        config.reconcile_policy(),
    ));
    let scheduler = PollScheduler::new(engine, config.scheduler());

    if args.once {
        let report = scheduler.run_cycle(&ShutdownSignal::never()).await?;
        info!(?report, "Single cycle finished");
        return Ok(());
    }

    let (handle, signal) = shutdown::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("🛑 Shutdown requested, finishing in-flight players"),
            Err(e) => warn!(error = %e, "Failed to listen for ctrl-c, shutting down"),
        }
        handle.trigger();
    });

    scheduler.run(signal).await;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rankwatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // cwd and parents first, then the crate root
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
