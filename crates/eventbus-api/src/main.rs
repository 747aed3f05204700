//! Event Bus API server entry point.

use std::error::Error;

use eventbus_api::config::ServerConfig;
use eventbus_api::state::AppState;
use eventbus_api::telemetry::Telemetry;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = ServerConfig::from_env()?;
    let telemetry = Telemetry::init(config.otlp_endpoint.as_deref())?;

    info!(storage = ?config.storage, "Starting event bus API server");

    let app_state = AppState::from_config(&config).await?;
    let app = eventbus_api::app(app_state.clone());

    let addr = config.bind_addr()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining workers");
    app_state.shutdown().await;
    telemetry.shutdown();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
