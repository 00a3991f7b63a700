//! Render worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pvgen_worker::{metrics, QueueConsumer, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting pvgen-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        match metrics::init_metrics(port) {
            Ok(()) => info!("Serving Prometheus metrics on port {}", port),
            Err(e) => error!("Failed to start metrics exporter: {}", e),
        }
    }

    let consumer = match QueueConsumer::connect(&config).await {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Failed to start queue consumer: {}", e);
            std::process::exit(1);
        }
    };

    info!("Consumer {} ready", consumer.consumer_name());

    let signal_consumer = Arc::clone(&consumer);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal, finishing current job");
        signal_consumer.shutdown();
    });

    if let Err(e) = consumer.run().await {
        error!("Consumer error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

/// Colored text logs for dev, JSON for production.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,pvgen=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
