use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use channel_post_archiver::archive::ArchiveStore;
use channel_post_archiver::config::Config;
use channel_post_archiver::image::host_from_config;
use channel_post_archiver::ingest::{run_once, IngestOptions};
use channel_post_archiver::post::civil_date;
use channel_post_archiver::source::{http_client, TelegramWebSource};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting channel-post-archiver");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        channel = %config.channel,
        archive = %config.archive_path.display(),
        merge_mode = ?config.merge_mode,
        image_host = ?config.image_host,
        "Configuration loaded"
    );

    if let Some(parent) = config.archive_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create archive directory: {}", parent.display())
            })?;
        }
    }

    // One client for the channel reader and the image host
    let http = http_client(config.http_timeout).context("Failed to build HTTP client")?;

    let source = TelegramWebSource::from_config(http.clone(), &config)
        .context("Failed to initialize channel reader")?;
    let host = host_from_config(&config, http).context("Failed to initialize image host")?;

    let today = civil_date(Utc::now());
    let options = IngestOptions::from_config(&config, today);
    let store = ArchiveStore::new(&config.archive_path);

    let summary = run_once(&store, &source, host.as_deref(), &options).await?;

    info!(
        added = summary.added,
        updated = summary.updated,
        removed = summary.removed,
        total = summary.total,
        "Run complete: {summary}"
    );

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,channel_post_archiver=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
