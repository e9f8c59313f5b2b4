use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Run-level failures. Every variant terminates a loader run.
///
/// Uniqueness conflicts are not represented here: they are absorbed by the
/// bulk loader and the weight upsert.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed input at {location}: {reason}")]
    Malformed { location: String, reason: String },
    #[error("unknown parameter `{name}` at {location}")]
    UnknownParameter { name: String, location: String },
    #[error(
        "batch for {partition} read {lines_read} lines but accounted for {rows_accounted} rows"
    )]
    BatchMismatch {
        partition: String,
        lines_read: u64,
        rows_accounted: u64,
    },
    #[error("run read {lines_read} lines but accounted for {rows_accounted} rows")]
    TotalMismatch { lines_read: u64, rows_accounted: u64 },
    #[error("lookup failed: {0}")]
    Lookup(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LoadError {
    pub fn malformed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        LoadError::Malformed {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LoadError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<sqlx::Error> for LoadError {
    fn from(err: sqlx::Error) -> Self {
        LoadError::Store(StoreError::from(err))
    }
}
