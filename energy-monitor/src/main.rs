use anyhow::Result;
use energy_client::{Aggregator, ReadingStore};
use energy_monitor::{
    api::{self, AppState},
    collector::Collector,
    config::AppConfig,
    device::{DeviceClient, TuyaCloudClient},
    export::ExportMirror,
    metrics_server, observability,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr).await?;
    }

    let store = ReadingStore::open(&cfg.storage.database_path, cfg.storage.max_connections).await?;
    tracing::info!(path = %cfg.storage.database_path.display(), "reading store ready");

    let mirror = ExportMirror::new(&cfg.storage.export_path);
    mirror.init().await?;

    let device: Arc<dyn DeviceClient> = Arc::new(TuyaCloudClient::new(&cfg.device)?);

    // Background collector; its ticks never fail the process.
    let collector = Collector::new(device.clone(), store.clone(), mirror.clone());
    let collector_task = tokio::spawn(collector.run(cfg.collector.interval()));

    let state = AppState {
        device,
        aggregator: Aggregator::new(store.clone(), cfg.pricing.cost_rate),
        mirror,
    };
    let app = api::create_router(state);

    let addr = cfg.http.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, cost_rate = cfg.pricing.cost_rate, "http server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    collector_task.abort();
    store.close().await;
    tracing::info!("shut down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
