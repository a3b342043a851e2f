//! PostgreSQL pool and schema setup.

use std::time::Duration;

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!("./src/migrations");

/// Pool sizing and timeouts.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

/// Connects the pool. Fails if the first connection cannot be made within
/// the acquire timeout.
pub async fn create_pool(settings: &PoolSettings) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(settings.idle_timeout)
        .test_before_acquire(true)
        .connect(&settings.url)
        .await?;

    info!(
        max_connections = settings.max_connections,
        min_connections = settings.min_connections,
        "Database pool connected"
    );
    Ok(pool)
}

/// Brings the schema up to date. Already applied migrations are skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await?;
    info!(known = MIGRATOR.iter().count(), "Schema migrations applied");
    Ok(())
}
