//! Storage seam for the loaders.
//!
//! The core never talks to PostgreSQL directly. It drives one of the traits below,
//! which expose exactly the write primitives the load algorithms need:
//!
//! - nested checkpoints (savepoints) with open/release/rollback,
//! - a set-oriented bulk transfer into a named table,
//! - single-row inserts and keyed updates,
//! - a commit of the enclosing transaction.
//!
//! [`PgStore`] is the production implementation. The in-memory store in
//! `test_support` follows the same contract for unit tests.
//!
//! # Savepoint scoping
//!
//! [`within_savepoint`] wraps a unit of work in a savepoint and guarantees the
//! savepoint is released on success and rolled back (then released) on failure,
//! so a failed statement can never leave the enclosing transaction aborted.

pub mod postgres;

pub use postgres::PgStore;

use crate::models::{ForecastRecord, WeightRow};
use thiserror::Error;

/// SQLSTATE for `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "unique constraint violated ({}): {message}",
        constraint.as_deref().unwrap_or("unnamed")
    )]
    UniqueViolation {
        constraint: Option<String>,
        message: String,
    },
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("transaction is no longer open")]
    TransactionClosed,
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether this error is an expected uniqueness conflict.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                return StoreError::UniqueViolation {
                    constraint: db_err.constraint().map(str::to_string),
                    message: db_err.message().to_string(),
                };
            }
        }
        StoreError::Database(err)
    }
}

/// Transaction and savepoint primitives shared by every sink.
#[allow(async_fn_in_trait)]
pub trait TransactionalStore {
    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError>;

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError>;

    /// Commit everything written so far and keep a fresh transaction open.
    async fn commit(&mut self) -> Result<(), StoreError>;
}

/// Write target for forecast records.
#[allow(async_fn_in_trait)]
pub trait RecordSink: TransactionalStore {
    /// Bulk-transfer a COPY text payload into `table`, returning the row count.
    async fn copy_rows(&mut self, table: &str, payload: &str) -> Result<u64, StoreError>;

    async fn insert_record(
        &mut self,
        table: &str,
        record: &ForecastRecord,
    ) -> Result<(), StoreError>;
}

/// Write target for model weights.
#[allow(async_fn_in_trait)]
pub trait WeightSink: TransactionalStore {
    async fn insert_weight(&mut self, row: &WeightRow) -> Result<(), StoreError>;

    /// Overwrite the coefficients of the row sharing `row.key`.
    async fn update_weight(&mut self, row: &WeightRow) -> Result<u64, StoreError>;
}

/// Run `body` inside the savepoint `name`.
///
/// On `Ok` the savepoint is released. On `Err` the work is rolled back to the
/// savepoint and the savepoint released before the error is handed back, leaving
/// the enclosing transaction usable. A failure of the cleanup itself replaces
/// the original error since the transaction state is then unknown; the
/// original error is logged first.
pub async fn within_savepoint<S, T, F>(
    store: &mut S,
    name: &str,
    body: F,
) -> Result<T, StoreError>
where
    S: TransactionalStore,
    F: AsyncFnOnce(&mut S) -> Result<T, StoreError>,
{
    store.savepoint(name).await?;

    let outcome = body(&mut *store).await;
    match outcome {
        Ok(value) => {
            store.release_savepoint(name).await?;
            Ok(value)
        }
        Err(err) => {
            let cleanup = match store.rollback_to_savepoint(name).await {
                Ok(()) => store.release_savepoint(name).await,
                Err(cleanup_err) => Err(cleanup_err),
            };
            if let Err(cleanup_err) = cleanup {
                log::error!(
                    "statement in savepoint {} failed: {}; rolling back also failed",
                    name,
                    err
                );
                return Err(cleanup_err);
            }
            Err(err)
        }
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `"schema"."table"`
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}
