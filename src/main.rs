use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use courier_dispatch::api;
use courier_dispatch::config::Config;
use courier_dispatch::engine::scheduler::AssignmentScheduler;
use courier_dispatch::error::AppError;
use courier_dispatch::state::{AppState, Ports};
use courier_dispatch::store::memory::MemoryStore;
use courier_dispatch::store::seed::load_seed;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    if config.uses_dev_secrets() {
        tracing::warn!("running with development token secrets; set TRACKING_SECRET and ACCESS_TOKEN_SECRET");
    }

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &config.seed_file {
        let seed = load_seed(path).await?;
        tracing::info!(
            path = %path.display(),
            partners = seed.partners.len(),
            orders = seed.orders.len(),
            couriers = seed.couriers.len(),
            "seed loaded"
        );
        store.apply_seed(seed);
    }

    let http_port = config.http_port;
    let shared_state = Arc::new(AppState::new(config, Ports::in_memory(store)));

    let scheduler = AssignmentScheduler::start(shared_state.clone());
    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{http_port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port, "http server started");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")));

    scheduler.shutdown().await;
    tracing::info!("shutdown complete");

    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
