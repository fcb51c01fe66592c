use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use timelapse_service::config::ServiceConfig;
use timelapse_service::{Config, FfmpegEncoder, RunStatus, S3ObjectStore, TimelapseJob};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service);

    info!(
        service = %config.service.name,
        bucket = %config.s3.bucket,
        "Starting timelapse job"
    );

    // Initialize metrics
    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    // Initialize components
    let store = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 client")?,
    );
    let encoder = Arc::new(FfmpegEncoder::new(config.encoder.clone()));

    let mut job = TimelapseJob::from_config(&config, store, encoder)
        .context("Failed to build timelapse job")?;

    let reference = config.job.reference_time.unwrap_or_else(Utc::now);

    // An interrupted run drops its staging session, which clears staged frames
    let summary = tokio::select! {
        summary = job.run(reference) => summary,
        _ = shutdown_signal() => {
            warn!("Shutdown signal received, abandoning run");
            anyhow::bail!("Timelapse run interrupted");
        }
    };

    let report = serde_json::to_string_pretty(&summary).context("Failed to serialize run summary")?;
    println!("{}", report);

    info!(
        status = %summary.status,
        cameras = summary.cameras.len(),
        failed = summary.failed(),
        "Timelapse job finished"
    );

    if summary.status == RunStatus::Error {
        std::process::exit(1);
    }

    Ok(())
}

/// Initialize tracing/logging on stderr, keeping stdout for the run summary
fn init_tracing(service: &ServiceConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&service.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if service.log_format.eq_ignore_ascii_case("pretty") {
        registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
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
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
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
