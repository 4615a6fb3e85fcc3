use signoff_core::config::{AppConfig, ConfigError, LoadOptions};
use signoff_core::errors::WorkflowError;
use signoff_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub api: ApiState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("approval services could not be wired: {0}")]
    Services(#[source] WorkflowError),
}

#[allow(dead_code)]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    config.validate()?;

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let api = ApiState::new(db_pool.clone(), &config.workflow).map_err(BootstrapError::Services)?;
    info!(
        event_name = "system.bootstrap.services_ready",
        correlation_id = "bootstrap",
        sequence_count_fallback = config.workflow.sequence_count_fallback,
        guard_max_retries = config.workflow.guard_max_retries,
        "approval services wired"
    );

    Ok(Application { config, db_pool, api })
}
