//! Drives factor files through parsing, id resolution and the upsert.

use crate::error::LoadError;
use crate::models::WeightSummary;
use crate::store::{TransactionalStore, WeightSink};
use crate::weights::factor_csv::{FactorFileMeta, database_param_for, read_factor_file};
use crate::weights::lookup::LookupTables;
use crate::weights::upsert::{WeightTarget, upsert_weights};
use std::path::{Path, PathBuf};

const FACTOR_FILE_PREFIX: &str = "station";
const FACTOR_FILE_EXTENSION: &str = "csv";

/// Expand the command line inputs: files are kept as given, directories
/// contribute their `station*.csv` files in name order.
pub fn collect_factor_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, LoadError> {
    let mut files = Vec::new();

    for input in inputs {
        if !input.is_dir() {
            files.push(input.clone());
            continue;
        }

        let mut found = Vec::new();
        for entry in std::fs::read_dir(input).map_err(|e| LoadError::io(input, e))? {
            let path = entry.map_err(|e| LoadError::io(input, e))?.path();
            let is_factor_file = path.is_file()
                && path.extension().is_some_and(|ext| ext == FACTOR_FILE_EXTENSION)
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(FACTOR_FILE_PREFIX));
            if is_factor_file {
                found.push(path);
            }
        }
        found.sort();
        log::info!("{} factor files found in {}", found.len(), input.display());
        files.extend(found);
    }

    Ok(files)
}

pub struct FactorLoader<S> {
    store: S,
    lookups: LookupTables,
    overrides: FactorFileMeta,
    commit_interval_files: usize,
    files: usize,
    summary: WeightSummary,
}

impl<S: WeightSink + TransactionalStore> FactorLoader<S> {
    pub fn new(
        store: S,
        lookups: LookupTables,
        overrides: FactorFileMeta,
        commit_interval_files: usize,
    ) -> Self {
        Self {
            store,
            lookups,
            overrides,
            commit_interval_files: commit_interval_files.max(1),
            files: 0,
            summary: WeightSummary::default(),
        }
    }

    /// Load one factor file. Files for stations outside the network are skipped.
    pub async fn load_file(&mut self, path: &Path) -> Result<WeightSummary, LoadError> {
        let source = path.display().to_string();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let key = FactorFileMeta::from_file_name(name)
            .with_overrides(&self.overrides)
            .complete(&source)?;

        let mut file_summary = WeightSummary {
            files: 1,
            ..WeightSummary::default()
        };

        match self.lookups.station_id(&key.station) {
            None => {
                log::warn!(
                    "{}: station {} not found in network mapping, skipping",
                    source,
                    key.station
                );
                file_summary.files = 0;
                file_summary.skipped_files = 1;
            }
            Some(station_id) => {
                let param_name = database_param_for(&key.target_param).ok_or_else(|| {
                    LoadError::Lookup(format!(
                        "no parameter mapping for target {}",
                        key.target_param
                    ))
                })?;
                let target = WeightTarget {
                    mos_version_id: self.lookups.mos_version_id,
                    mos_period_id: key.season,
                    analysis_hour: key.analysis_hour,
                    station_id,
                    target_param_id: self.lookups.param_id(param_name)?,
                };

                let table = read_factor_file(path)?;
                let written = upsert_weights(&mut self.store, &target, &table).await?;
                log::info!(
                    "{}: {} steps, {} inserted, {} updated, {} all-zero dropped",
                    source,
                    written.steps_read,
                    written.inserted,
                    written.updated,
                    written.zero_steps_dropped
                );
                file_summary.merge(&written);
            }
        }

        self.files += 1;
        self.summary.merge(&file_summary);

        if self.files % self.commit_interval_files == 0 {
            log::info!("committing after {} factor files", self.files);
            self.store.commit().await?;
        }

        Ok(file_summary)
    }

    pub fn summary(&self) -> &WeightSummary {
        &self.summary
    }

    /// Hand the store back for the final commit.
    pub fn finish(self) -> (S, WeightSummary) {
        (self.store, self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WeightKey;
    use crate::test_support::MemoryStore;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookups() -> LookupTables {
        LookupTables {
            mos_version_id: 2,
            params: HashMap::from([("T-K".to_string(), 4), ("TD-K".to_string(), 5)]),
            stations: HashMap::from([("2974".to_string(), 100_971)]),
        }
    }

    fn loader(commit_interval_files: usize) -> FactorLoader<MemoryStore> {
        FactorLoader::new(
            MemoryStore::new(),
            lookups(),
            FactorFileMeta::default(),
            commit_interval_files,
        )
    }

    fn write_file(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    const FACTORS: &str = "\"\",\"3\",\"6\"\n\"Intercept\",1.5,0\n\"T2\",0.9,0\n";

    #[tokio::test]
    async fn loads_a_file_using_name_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "station_2974_12_season1_TA_lm.csv", FACTORS);

        let mut loader = loader(10);
        let summary = loader.load_file(&path).await.unwrap();
        let (store, total) = loader.finish();

        assert_eq!(summary.steps_read, 2);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.zero_steps_dropped, 1);
        assert_eq!(total.files, 1);

        let key = WeightKey {
            mos_version_id: 2,
            analysis_hour: 12,
            station_id: 100_971,
            forecast_period: 3,
            target_param_id: 4,
        };
        let stored = store.weight(&key).unwrap();
        assert_eq!(stored["INTERCEPT-N/NOLEVEL/0"], "1.5");
    }

    #[tokio::test]
    async fn unknown_station_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "station_1_12_season1_TA_lm.csv", FACTORS);

        let mut loader = loader(10);
        let summary = loader.load_file(&path).await.unwrap();
        let (store, _) = loader.finish();

        assert_eq!(summary.skipped_files, 1);
        assert_eq!(store.weight_count(), 0);
    }

    #[tokio::test]
    async fn overrides_supply_missing_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "weights.csv", FACTORS);
        let overrides = FactorFileMeta {
            station: Some("2974".to_string()),
            analysis_hour: Some(0),
            season: Some(2),
            target_param: Some("TD".to_string()),
        };

        let mut loader = FactorLoader::new(MemoryStore::new(), lookups(), overrides, 10);
        loader.load_file(&path).await.unwrap();
        let (store, _) = loader.finish();

        let key = WeightKey {
            mos_version_id: 2,
            analysis_hour: 0,
            station_id: 100_971,
            forecast_period: 3,
            target_param_id: 5,
        };
        assert!(store.weight(&key).is_some());
    }

    #[tokio::test]
    async fn missing_metadata_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "weights.csv", FACTORS);

        let mut loader = loader(10);
        let err = loader.load_file(&path).await.unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
    }

    #[tokio::test]
    async fn directory_expands_to_sorted_station_files_and_commits_per_interval() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "station_2974_12_season2_TA_lm.csv", FACTORS);
        write_file(dir.path(), "station_2974_00_season1_TA_lm.csv", FACTORS);
        write_file(dir.path(), "notes.txt", "ignored");
        write_file(dir.path(), "other.csv", FACTORS);

        let files = collect_factor_files(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["station_2974_00_season1_TA_lm.csv", "station_2974_12_season2_TA_lm.csv"]
        );

        let mut loader = loader(1);
        for file in &files {
            loader.load_file(file).await.unwrap();
        }
        let (store, total) = loader.finish();

        assert_eq!(total.files, 2);
        assert_eq!(total.inserted, 2);
        assert_eq!(store.commits(), 2);
        assert_eq!(store.weight_count(), 2);
    }
}
