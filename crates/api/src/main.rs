use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ehs_integrations_api::{
    app::{create_app, AppState},
    config::Config,
    middleware::{init_metrics, logging::init_logging},
    services::HttpTransport,
};
use persistence::Stores;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    init_logging(&config.logging)?;
    init_metrics()?;

    info!("Starting EHS integrations v{}", env!("CARGO_PKG_VERSION"));

    let pool = persistence::db::create_pool(&config.database.pool_settings()).await?;

    info!("Running database migrations...");
    persistence::db::run_migrations(&pool).await?;
    info!("Migrations completed");

    let transport = HttpTransport::new(Duration::from_secs(config.webhooks.timeout_secs))
        .context("Failed to build webhook HTTP client")?;
    let addr = config.socket_addr()?;
    let jobs_enabled = config.jobs.enabled;

    let state = AppState::new(config, Stores::postgres(pool), Arc::new(transport))?;
    let scheduler = Arc::clone(&state.scheduler);

    if jobs_enabled {
        scheduler.start().await;
    } else {
        info!("Background jobs disabled");
    }

    let app = create_app(state);
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(Duration::from_secs(30)).await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
