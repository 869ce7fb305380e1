pub mod api;
pub mod bootstrap;
pub mod clients;
pub mod config;
pub mod db;
pub mod entities;
pub mod services;

use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub use config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("pdfdesk v{} starting...", env!("CARGO_PKG_VERSION"));

    let port = config.server.port;

    // Store connection and admin bootstrap both complete before the
    // listener binds; the process never serves traffic with zero admins.
    let state = api::create_app_state(config).await?;

    let app = api::router(state).into_make_service_with_connect_info::<SocketAddr>();

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server running on port {port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Error listening for shutdown: {e}"),
    }
}
