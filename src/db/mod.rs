//! Database initialization and migration runner.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::StoreConfig;

/// Initialize the PostgreSQL connection pool and run migrations.
///
/// The migrations create the four tables with cascading foreign keys and
/// install the trigger that publishes row changes on the push channel.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(config: &StoreConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;
    info!(max_connections = config.max_connections, "pg: pool ready, migrations applied");

    Ok(pool)
}
