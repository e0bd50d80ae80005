mod bootstrap;
mod chat;
mod health;

use std::time::Duration;

use anyhow::Result;
use axum::{routing::post, Router};
use concierge_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use concierge_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

fn api_router(state: bootstrap::AppState) -> Router {
    Router::new().route("/api/v1/chat", post(chat::handle)).with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let state = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &state.config.server.bind_address,
        state.config.server.health_check_port,
        state.db_pool.clone(),
    )
    .await?;

    let address = format!("{}:{}", state.config.server.bind_address, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let shutdown_grace = Duration::from_secs(state.config.server.graceful_shutdown_secs);
    let db_pool = state.db_pool.clone();

    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        "concierge-server started"
    );

    axum::serve(listener, api_router(state))
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    // In-flight handlers were drained by the graceful shutdown above; the
    // grace period bounds how long we wait for the pool to settle.
    tracing::info!(
        event_name = "system.server.stopping",
        grace_secs = shutdown_grace.as_secs(),
        "concierge-server stopping"
    );
    let _ = tokio::time::timeout(shutdown_grace, db_pool.close()).await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            error = %error,
            "failed to listen for shutdown signal"
        );
    }
}
