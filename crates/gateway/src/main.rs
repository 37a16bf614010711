//! Gateway service entry point.

use anyhow::Result;
use gateway::{
    create_router, work_queue, AppState, ChainCache, ChainReader, ClientRegistry, Config,
    Dispatcher, PollDriver,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use upstream::{HttpTransport, UpstreamPool};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Hive WebSocket gateway");

    let config = Config::from_env();
    info!("Configuration:");
    info!("  PORT: {}", config.port);
    info!("  METRICS_PORT: {}", config.metrics_port);
    info!("  HIVE_RPC_NODES: {:?}", config.endpoints);
    info!("  ALLOWED_ORIGINS: {:?}", config.allowed_origins);
    info!("  WITNESS_TTL: {:?}", config.witness_ttl);

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");
    info!("Prometheus exporter on port {}", config.metrics_port);

    // shared state, wired once and handed into the long-lived tasks
    let transport = Arc::new(HttpTransport::new(config.upstream_timeout)?);
    let pool = Arc::new(UpstreamPool::new(config.endpoints.clone(), transport)?);
    let cache = Arc::new(ChainCache::new(config.block_cache_capacity));
    let reader = Arc::new(ChainReader::new(pool, cache, &config));
    let registry = Arc::new(ClientRegistry::new());
    let (queue, work_rx) = work_queue(config.queue_bound);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Arc::new(Dispatcher::new(reader.clone(), registry.clone()));
    let dispatcher_handle = tokio::spawn(dispatcher.run(work_rx));

    let driver = Arc::new(PollDriver::new(reader.clone(), registry.clone(), &config));
    let poll_handle = tokio::spawn(driver.clone().run(shutdown_rx.clone()));
    let probe_handle = tokio::spawn(driver.run_probe(shutdown_rx));

    let state = Arc::new(AppState {
        registry,
        reader,
        queue,
        config: config.clone(),
        started_at: Instant::now(),
    });
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down background tasks");
    let _ = shutdown_tx.send(true);
    let _ = poll_handle.await;
    let _ = probe_handle.await;
    // the router (and with it the queue sender) is gone, so the
    // dispatcher drains its queue and exits on its own
    let _ = dispatcher_handle.await;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
