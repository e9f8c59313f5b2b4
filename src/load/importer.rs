//! Import coordination for forecast files.
//!
//! The importer drives the whole pipeline for each input file:
//! 1. Stream records from the file
//! 2. Route each record to its partition
//! 3. Accumulate consecutive records per partition
//! 4. Hand every completed batch to the bulk loader before reading on
//! 5. Reconcile lines read against rows accounted, per batch and per file
//!
//! All files of a run share the store's transaction. It is committed every
//! `commit_interval_files` files and once more by the caller at the end.

use crate::config::LoaderConfig;
use crate::error::LoadError;
use crate::load::batch::{Batch, BatchAccumulator};
use crate::load::bulk_loader::BulkLoader;
use crate::load::parser::RecordReader;
use crate::load::partition::PartitionResolver;
use crate::load::stats::Reconciliation;
use crate::models::{ForecastRecord, LoadSummary};
use crate::store::RecordSink;
use std::path::Path;

pub struct ForecastImporter<S> {
    store: S,
    resolver: PartitionResolver,
    loader: BulkLoader,
    max_batch_rows: usize,
    commit_interval_files: usize,
    files: usize,
    totals: Reconciliation,
}

impl<S: RecordSink> ForecastImporter<S> {
    pub fn new(store: S, resolver: PartitionResolver, config: &LoaderConfig) -> Self {
        Self {
            store,
            resolver,
            loader: BulkLoader::new(),
            max_batch_rows: config.max_batch_rows.max(1),
            commit_interval_files: config.commit_interval_files.max(1),
            files: 0,
            totals: Reconciliation::new(),
        }
    }

    /// Import one file, committing if the file count hits the commit interval.
    pub async fn import_file(&mut self, path: &Path) -> Result<Reconciliation, LoadError> {
        log::info!("importing {}", path.display());
        let reader = RecordReader::open(path)?;
        let counter = self.import_records(reader).await?;

        self.files += 1;
        log::info!(
            "{}: {} lines read, {} rows accounted",
            path.display(),
            counter.lines_read(),
            counter.rows_accounted()
        );

        if self.files % self.commit_interval_files == 0 {
            log::info!("committing after {} files", self.files);
            self.store.commit().await?;
        }

        Ok(counter)
    }

    /// Run a record stream through accumulation, loading and reconciliation.
    pub async fn import_records<I>(&mut self, records: I) -> Result<Reconciliation, LoadError>
    where
        I: IntoIterator<Item = Result<ForecastRecord, LoadError>>,
    {
        let mut counter = Reconciliation::new();
        let mut accumulator = BatchAccumulator::new(self.max_batch_rows);

        for record in records {
            let record = record?;
            counter.line_read();

            let partition = self.resolver.resolve(record.station_id);
            if let Some(batch) = accumulator.push(partition, record) {
                self.flush(&batch, &mut counter).await?;
            }
        }

        if let Some(batch) = accumulator.finish() {
            self.flush(&batch, &mut counter).await?;
        }

        counter.verify_totals()?;
        self.totals.merge(&counter);
        Ok(counter)
    }

    async fn flush(
        &mut self,
        batch: &Batch,
        counter: &mut Reconciliation,
    ) -> Result<(), LoadError> {
        let outcome = self.loader.load(&mut self.store, batch).await?;
        counter.record_batch(batch.partition(), batch.len(), &outcome)?;

        log::debug!(
            "batch {}: {} lines, {} inserted, {} duplicates{}",
            batch.partition(),
            batch.len(),
            outcome.rows_inserted,
            outcome.duplicates_skipped,
            if outcome.fell_back { " (row-level)" } else { "" }
        );
        Ok(())
    }

    pub fn summary(&self) -> LoadSummary {
        self.totals.summary(self.files)
    }

    /// Run the final reconciliation and hand the store back for the last commit.
    pub fn finish(self) -> Result<(S, LoadSummary), LoadError> {
        self.totals.verify_totals()?;
        let summary = self.totals.summary(self.files);
        Ok((self.store, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;
    use chrono::NaiveDate;
    use std::io::Write;

    const P20: &str = "previ_ecmos_narrow_p20";
    const DEFAULT: &str = "previ_ecmos_narrow";

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
            value: "2.5".to_string(),
        }
    }

    fn importer(store: MemoryStore, config: &LoaderConfig) -> ForecastImporter<MemoryStore> {
        let resolver = PartitionResolver::new(DEFAULT, [P20.to_string()]);
        ForecastImporter::new(store, resolver, config)
    }

    fn ok(records: Vec<ForecastRecord>) -> Vec<Result<ForecastRecord, LoadError>> {
        records.into_iter().map(Ok).collect()
    }

    #[tokio::test]
    async fn stations_20_and_23_load_as_one_batch() {
        let mut importer = importer(MemoryStore::new(), &LoaderConfig::default());
        let input = ok(vec![
            record(20, 1),
            record(20, 2),
            record(20, 3),
            record(23, 1),
            record(23, 2),
        ]);

        let counter = importer.import_records(input).await.unwrap();
        let (store, summary) = importer.finish().unwrap();

        assert_eq!(counter.lines_read(), 5);
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.rows_inserted, 5);
        assert_eq!(store.row_count(P20), 5);
        assert_eq!(store.copy_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_partition_routes_to_default_table() {
        let mut importer = importer(MemoryStore::new(), &LoaderConfig::default());
        let input = ok(vec![record(20, 1), record(31, 1), record(32, 1), record(21, 1)]);

        importer.import_records(input).await.unwrap();
        let (store, summary) = importer.finish().unwrap();

        assert_eq!(summary.batches, 3);
        assert_eq!(store.row_count(P20), 2);
        assert_eq!(store.row_count(DEFAULT), 2);
    }

    #[tokio::test]
    async fn existing_rows_are_skipped_and_reconciled() {
        let mut store = MemoryStore::new();
        store.seed_record(P20, &record(20, 3));
        let mut importer = importer(store, &LoaderConfig::default());

        let input = ok((1..=4).map(|p| record(20, p)).collect());
        importer.import_records(input).await.unwrap();
        let (_, summary) = importer.finish().unwrap();

        assert_eq!(summary.lines_read, 4);
        assert_eq!(summary.rows_inserted, 3);
        assert_eq!(summary.duplicates_skipped, 1);
        assert_eq!(summary.fallback_batches, 1);
    }

    #[tokio::test]
    async fn malformed_record_stops_before_later_batches() {
        let mut importer = importer(MemoryStore::new(), &LoaderConfig::default());
        let input = vec![
            Ok(record(20, 1)),
            Ok(record(31, 1)),
            Err(LoadError::malformed("input.csv:3", "expected 7 fields, found 6")),
            Ok(record(40, 1)),
        ];

        let err = importer.import_records(input).await.unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));

        let (store, _) = importer.finish().unwrap();
        assert_eq!(store.row_count(P20), 1);
        assert_eq!(store.row_count(DEFAULT), 0);
    }

    #[tokio::test]
    async fn storage_failure_is_fatal_and_nothing_is_committed() {
        let mut store = MemoryStore::new();
        store.fail_station(31);
        let mut importer = importer(store, &LoaderConfig::default());

        let input = ok(vec![record(20, 1), record(31, 1), record(20, 2)]);
        let err = importer.import_records(input).await.unwrap_err();
        assert!(matches!(err, LoadError::Store(_)));

        let (store, _) = importer.finish().unwrap();
        assert_eq!(store.committed_row_count(P20), 0);
    }

    #[tokio::test]
    async fn second_run_adds_no_rows() {
        let input = || ok((1..=6).map(|p| record(20 + p % 3, p)).collect());

        let mut first = importer(MemoryStore::new(), &LoaderConfig::default());
        first.import_records(input()).await.unwrap();
        let (store, first_summary) = first.finish().unwrap();

        let mut second = importer(store, &LoaderConfig::default());
        second.import_records(input()).await.unwrap();
        let (store, second_summary) = second.finish().unwrap();

        assert_eq!(first_summary.rows_inserted, 6);
        assert_eq!(second_summary.rows_inserted, 0);
        assert_eq!(second_summary.duplicates_skipped, 6);
        assert_eq!(store.row_count(P20), 6);
    }

    #[tokio::test]
    async fn files_commit_on_the_configured_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for (i, station) in [20, 21, 22].iter().enumerate() {
            let path = dir.path().join(format!("part{i}.csv"));
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "# header comment").unwrap();
            writeln!(file, "2024-03-01 00:00:00,6,{station},4,5,0,1.0").unwrap();
            paths.push(path);
        }

        let config = LoaderConfig {
            commit_interval_files: 2,
            ..LoaderConfig::default()
        };
        let mut importer = importer(MemoryStore::new(), &config);
        for path in &paths {
            importer.import_file(path).await.unwrap();
        }
        let (store, summary) = importer.finish().unwrap();

        assert_eq!(summary.files, 3);
        assert_eq!(store.commits(), 1);
        assert_eq!(store.committed_row_count(P20), 2);
        assert_eq!(store.row_count(P20), 3);
    }
}
