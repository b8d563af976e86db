use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tableside::clients::{
    NoopCatalogClient, NoopFulfillmentClient, NoopNotificationClient, NoopPaymentClient,
};
use tableside::config::AppConfig;
use tableside::metrics::{start_metrics_server, Metrics};
use tableside::repository;
use tableside::service::{LifecycleService, ReadyScanWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tableside=debug")),
        )
        .init();

    tracing::info!("🚀 Starting tableside order core");

    let config = AppConfig::from_env()?;
    tracing::info!(
        backend = if config.use_relational { "postgres" } else { "scylla" },
        "Configuration loaded"
    );

    // === 1. Connect the order store ===
    let repo = repository::connect(&config).await?;

    // === 2. Initialize Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!(
        registered = metrics.registry().gather().len(),
        "Metrics registry created"
    );

    // Metrics HTTP server runs on its own runtime so actix and tokio do not
    // share one.
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!("Metrics runtime creation failed: {}", e);
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = start_metrics_server(metrics_registry, metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 3. Wire the lifecycle service ===
    let service = Arc::new(LifecycleService::new(
        repo,
        Arc::new(NoopCatalogClient),
        Arc::new(NoopPaymentClient),
        Arc::new(NoopNotificationClient),
        Arc::new(NoopFulfillmentClient),
        metrics,
    ));

    // === 4. Start the ready-scan sweeper ===
    let worker = ReadyScanWorker::new(service.clone(), config.ready_scan_interval_secs);
    tokio::spawn(worker.run());

    tracing::info!("Order core running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    Ok(())
}
