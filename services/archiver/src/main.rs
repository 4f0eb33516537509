use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tweet_archiver::{build_job, ArchiverConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = ArchiverConfig::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, &config.service.log_format);

    config.validate().context("Invalid configuration")?;

    info!(
        service = %config.service.name,
        threshold = config.archive.threshold,
        bucket = %config.object_store.bucket,
        "Starting archival run"
    );

    let response = build_job(&config).await.run().await;

    println!(
        "{}",
        serde_json::to_string(&response).context("Failed to serialize job response")?
    );

    if !response.is_success() {
        error!(status_code = response.status_code, "Archival run failed");
        std::process::exit(1);
    }

    info!("Archival run completed");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, format: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }
}
