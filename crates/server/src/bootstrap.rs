use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use concierge_agent::{HttpLlmClient, LlmClient, LlmError};
use concierge_core::config::{AppConfig, ConfigError, LoadOptions};
use concierge_db::{connect_with_settings, migrations, DbPool};

/// Shared handles for every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub llm: Arc<dyn LlmClient>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client construction failed: {0}")]
    LlmClient(#[source] LlmError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<AppState, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<AppState, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let llm: Arc<dyn LlmClient> =
        Arc::new(HttpLlmClient::from_config(&config.llm).map_err(BootstrapError::LlmClient)?);

    Ok(AppState { config, db_pool, llm })
}
