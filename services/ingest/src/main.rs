use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tweet_ingest::api::{start_api_server, AppState};
use tweet_ingest::config::{IngestConfig, LoggingConfig};
use tweet_ingest::{build_registry, MetricsSink, NoopMetricsSink, PrometheusMetricsSink};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = load_config()?;

    // Initialize logging
    init_tracing(&config.logging)?;

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        upstream = %config.upstream.base_url,
        "Starting tweet ingest service"
    );

    config.validate().context("Invalid configuration")?;

    // Initialize metrics
    let metrics: Arc<dyn MetricsSink> = if config.service.enable_metrics {
        init_metrics(config.service.metrics_port)?;
        Arc::new(PrometheusMetricsSink)
    } else {
        Arc::new(NoopMetricsSink)
    };

    let registry = build_registry(&config, metrics)
        .await
        .context("Failed to initialize stream consumer")?;

    let api_state = AppState {
        registry: registry.clone(),
    };
    let api_config = config.api.clone();
    let (stop_api, api_stopped) = tokio::sync::oneshot::channel::<()>();

    // Spawn API server task
    let api_handle = tokio::spawn(async move {
        let shutdown = async {
            let _ = api_stopped.await;
        };
        if let Err(e) = start_api_server(api_state, &api_config, shutdown).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Ingest service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down ingest service");

    let _ = stop_api.send(());
    registry.shutdown().await;
    if let Err(e) = api_handle.await {
        warn!(error = %e, "API server task failed");
    }

    info!("Ingest service stopped");

    Ok(())
}

/// Load configuration, falling back to environment only
fn load_config() -> Result<IngestConfig> {
    let config = IngestConfig::load().or_else(|e| {
        eprintln!("Failed to load config from files ({e}), trying environment");
        IngestConfig::from_env()
    })?;

    Ok(config)
}

/// Initialize tracing/logging
fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Invalid log level")?
        .add_directive("hyper=warn".parse()?)
        .add_directive("aws_smithy_runtime=warn".parse()?);

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
