//! Bulk loading of one batch with row-level fallback.
//!
//! # Algorithm
//!
//! 1. Open the savepoint `bulk_batch` and COPY the whole batch into its table.
//!    On success the savepoint is released and every row counts as inserted.
//! 2. If the COPY hits a uniqueness violation, one conflicting row has voided
//!    the whole transfer. The savepoint is rolled back, discarding the partial
//!    attempt, and the batch is replayed row by row.
//! 3. Each replayed row runs in its own `bulk_row` savepoint. A row that
//!    violates uniqueness is already stored: its savepoint is rolled back and
//!    the row is counted as a duplicate. Rows that insert cleanly count as
//!    inserted.
//!
//! Any other error, on either path, is returned immediately and ends the run
//! with the enclosing transaction left uncommitted.

use crate::load::batch::Batch;
use crate::store::{RecordSink, StoreError, within_savepoint};

const BULK_SAVEPOINT: &str = "bulk_batch";
const ROW_SAVEPOINT: &str = "bulk_row";

/// What happened to one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Rows newly written by this batch.
    pub rows_inserted: u64,
    /// Rows that already existed and were skipped in fallback mode.
    pub duplicates_skipped: u64,
    /// Whether the bulk attempt failed and rows were replayed individually.
    pub fell_back: bool,
}

impl LoadOutcome {
    /// Rows either inserted or confirmed as already present.
    pub fn rows_accounted(&self) -> u64 {
        self.rows_inserted + self.duplicates_skipped
    }
}

/// Writes batches through a [`RecordSink`].
#[derive(Debug, Default)]
pub struct BulkLoader;

impl BulkLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load `batch` into its partition.
    pub async fn load<S: RecordSink>(
        &self,
        store: &mut S,
        batch: &Batch,
    ) -> Result<LoadOutcome, StoreError> {
        if batch.is_empty() {
            return Ok(LoadOutcome::default());
        }

        let table = batch.partition();
        let payload = batch.payload();

        let bulk = within_savepoint(store, BULK_SAVEPOINT, async |s: &mut S| {
            s.copy_rows(table, payload).await
        })
        .await;

        match bulk {
            Ok(rows) => {
                log::debug!("copied {} rows into {}", rows, table);
                Ok(LoadOutcome {
                    rows_inserted: rows,
                    duplicates_skipped: 0,
                    fell_back: false,
                })
            }
            Err(err) if err.is_unique_violation() => {
                log::warn!(
                    "bulk copy of {} rows into {} conflicted ({}), loading row by row",
                    batch.len(),
                    table,
                    err
                );
                self.load_rows(store, batch).await
            }
            Err(err) => Err(err),
        }
    }

    async fn load_rows<S: RecordSink>(
        &self,
        store: &mut S,
        batch: &Batch,
    ) -> Result<LoadOutcome, StoreError> {
        let table = batch.partition();
        let mut outcome = LoadOutcome {
            fell_back: true,
            ..LoadOutcome::default()
        };

        for record in batch.rows() {
            let inserted = within_savepoint(store, ROW_SAVEPOINT, async |s: &mut S| {
                s.insert_record(table, record).await
            })
            .await;

            match inserted {
                Ok(()) => outcome.rows_inserted += 1,
                Err(err) if err.is_unique_violation() => {
                    log::trace!(
                        "skipping duplicate row station={} time={} period={} param={}",
                        record.station_id,
                        record.analysis_time,
                        record.forecast_period,
                        record.parameter_id
                    );
                    outcome.duplicates_skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        log::debug!(
            "row-level load into {}: {} inserted, {} duplicates skipped",
            table,
            outcome.rows_inserted,
            outcome.duplicates_skipped
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ForecastRecord;
    use crate::test_support::MemoryStore;
    use chrono::NaiveDate;

    const TABLE: &str = "previ_ecmos_narrow_p20";

    fn record(station_id: i32, period: i32) -> ForecastRecord {
        ForecastRecord {
            analysis_time: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            forecast_period: period,
            station_id,
            parameter_id: 4,
            level_id: 5,
            level_value: 0,
            value: format!("{}.5", period),
        }
    }

    fn batch(records: impl IntoIterator<Item = ForecastRecord>) -> Batch {
        let mut batch = Batch::new(TABLE);
        for record in records {
            batch.push(record);
        }
        batch
    }

    #[tokio::test]
    async fn clean_batch_goes_through_bulk_path() {
        let mut store = MemoryStore::new();
        let batch = batch((1..=4).map(|p| record(20, p)));

        let outcome = BulkLoader::new().load(&mut store, &batch).await.unwrap();

        assert_eq!(
            outcome,
            LoadOutcome {
                rows_inserted: 4,
                duplicates_skipped: 0,
                fell_back: false
            }
        );
        assert_eq!(store.row_count(TABLE), 4);
        assert_eq!(store.copy_calls(), 1);
        assert_eq!(store.insert_calls(), 0);
        assert_eq!(store.open_savepoints(), 0);
    }

    #[tokio::test]
    async fn conflict_in_row_three_falls_back_and_skips_it() {
        let mut store = MemoryStore::new();
        store.seed_record(TABLE, &record(20, 3));
        let batch = batch((1..=4).map(|p| record(20, p)));

        let outcome = BulkLoader::new().load(&mut store, &batch).await.unwrap();

        assert!(outcome.fell_back);
        assert_eq!(outcome.rows_inserted, 3);
        assert_eq!(outcome.duplicates_skipped, 1);
        assert_eq!(outcome.rows_accounted(), 4);
        assert_eq!(store.row_count(TABLE), 4);
        assert_eq!(store.insert_calls(), 4);
        assert!(!store.is_aborted());
        assert_eq!(store.open_savepoints(), 0);
    }

    #[tokio::test]
    async fn duplicate_inside_the_batch_is_skipped_once() {
        let mut store = MemoryStore::new();
        let batch = batch([record(20, 1), record(20, 2), record(20, 1)]);

        let outcome = BulkLoader::new().load(&mut store, &batch).await.unwrap();

        assert!(outcome.fell_back);
        assert_eq!(outcome.rows_inserted, 2);
        assert_eq!(outcome.duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn rerun_inserts_nothing_new() {
        let mut store = MemoryStore::new();
        let batch = batch((1..=5).map(|p| record(20, p)));
        let loader = BulkLoader::new();

        let first = loader.load(&mut store, &batch).await.unwrap();
        let second = loader.load(&mut store, &batch).await.unwrap();

        assert_eq!(first.rows_inserted, 5);
        assert_eq!(second.rows_inserted, 0);
        assert_eq!(second.duplicates_skipped, 5);
        assert_eq!(store.row_count(TABLE), 5);
    }

    #[tokio::test]
    async fn non_conflict_error_in_bulk_path_is_fatal() {
        let mut store = MemoryStore::new();
        store.fail_station(20);
        let batch = batch([record(20, 1)]);

        let err = BulkLoader::new().load(&mut store, &batch).await.unwrap_err();

        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(store.insert_calls(), 0);
        assert_eq!(store.row_count(TABLE), 0);
    }

    #[tokio::test]
    async fn non_conflict_error_in_fallback_aborts_and_commits_nothing() {
        let mut store = MemoryStore::new();
        store.seed_record(TABLE, &record(20, 1));
        store.commit_now();
        store.fail_station(21);
        let batch = batch([record(20, 1), record(20, 2), record(21, 3), record(20, 4)]);

        let err = BulkLoader::new().load(&mut store, &batch).await.unwrap_err();

        assert!(matches!(err, StoreError::Backend(_)));
        // row 4 was never attempted
        assert_eq!(store.insert_calls(), 3);
        assert_eq!(store.committed_row_count(TABLE), 1);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let mut store = MemoryStore::new();
        let outcome = BulkLoader::new()
            .load(&mut store, &Batch::new(TABLE))
            .await
            .unwrap();
        assert_eq!(outcome, LoadOutcome::default());
        assert_eq!(store.copy_calls(), 0);
    }
}
