use crate::config::DatabaseConfig;
use crate::error::LoadError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Open the run's database pool.
///
/// Loaders are single-writer processes, so the pool holds exactly one connection
/// and every statement of a run shares it.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, LoadError> {
    let options = config.connect_options()?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    log::debug!("connected to database {}", config.database);
    Ok(pool)
}
