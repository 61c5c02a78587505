use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use staysync::config;
use staysync::db;
use staysync::ical::HttpFeedSource;
use staysync::model::SyncStatus;
use staysync::notify::SlackWebhook;
use staysync::sync;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one full feed sync across all listings and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Trigger label recorded on the session
    #[arg(long, default_value = "cli")]
    source: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://staysync.db".to_string());

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let feed_source = HttpFeedSource::new(Duration::from_secs(cfg.app.http_timeout_seconds));
    let notifier = SlackWebhook::from_config(&cfg);

    info!("starting full sync");
    let outcome = sync::run_all(&pool, &feed_source, &notifier, &cfg, &args.source).await?;

    info!(
        session_id = %outcome.session_id,
        status = outcome.status.as_str(),
        batches = outcome.batches,
        added = outcome.stats.total_added,
        updated = outcome.stats.total_updated,
        deactivated = outcome.stats.total_deactivated,
        replaced = outcome.stats.total_replaced,
        unchanged = outcome.stats.total_unchanged,
        errors = outcome.stats.total_errors,
        "sync finished"
    );

    if outcome.status == SyncStatus::Error {
        error!("all listings failed to sync");
        std::process::exit(1);
    }

    Ok(())
}
