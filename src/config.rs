use crate::error::LoadError;
use sqlx::ConnectOptions;
use sqlx::postgres::PgConnectOptions;
use std::env;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Connection settings for the MOS database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Full connection string; takes precedence over the individual fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: env_optional("DATABASE_URL"),
            host: env_string("MOS_HOSTNAME", "localhost"),
            port: env_parsed("MOS_PORT", 5432),
            database: env_string("MOS_DATABASE", "mos"),
            user: env_string("MOS_USER", "mos_rw"),
            password: env_optional("MOS_MOSRW_PASSWORD"),
        }
    }

    /// Build connect options, failing when no credentials are available.
    pub fn connect_options(&self) -> Result<PgConnectOptions, LoadError> {
        let options = match &self.url {
            Some(url) => url
                .parse::<PgConnectOptions>()
                .map_err(|e| LoadError::Config(format!("invalid DATABASE_URL: {}", e)))?,
            None => {
                let password = self.password.as_deref().ok_or_else(|| {
                    LoadError::Config(
                        "password should be given with env variable MOS_MOSRW_PASSWORD".to_string(),
                    )
                })?;
                PgConnectOptions::new()
                    .host(&self.host)
                    .port(self.port)
                    .database(&self.database)
                    .username(&self.user)
                    .password(password)
            }
        };

        Ok(options
            .application_name("mos-loader")
            .log_statements(log::LevelFilter::Trace))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Runtime behavior of the loaders.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Schema holding the forecast tables.
    pub schema: String,
    /// Name of the unpartitioned default table; partitions are `<prefix>_p<decade>`.
    pub table_prefix: String,
    /// A batch is flushed once it holds this many records.
    pub max_batch_rows: usize,
    /// Commit the enclosing transaction after this many processed files.
    pub commit_interval_files: usize,
}

impl LoaderConfig {
    pub fn from_env() -> Self {
        Self {
            schema: env_string("MOS_SCHEMA", "data"),
            table_prefix: env_string("MOS_TABLE_PREFIX", "previ_ecmos_narrow"),
            max_batch_rows: env_parsed("MOS_MAX_BATCH_ROWS", 100_000usize).max(1),
            commit_interval_files: env_parsed("MOS_COMMIT_INTERVAL_FILES", 1000usize).max(1),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            schema: "data".to_string(),
            table_prefix: "previ_ecmos_narrow".to_string(),
            max_batch_rows: 100_000,
            commit_interval_files: 1000,
        }
    }
}
