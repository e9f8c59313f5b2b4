//! Line/row reconciliation for importer runs.
//!
//! Every input line must end up either inserted or confirmed as an existing
//! duplicate. The check runs after each batch and once more over the whole
//! run; any gap means rows were lost somewhere between the reader and the
//! table, and the run is stopped.

use crate::error::LoadError;
use crate::load::bulk_loader::LoadOutcome;
use crate::models::LoadSummary;

#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    lines_read: u64,
    rows_inserted: u64,
    duplicates_skipped: u64,
    batches: u64,
    fallback_batches: u64,
}

impl Reconciliation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one record taken from the input.
    pub fn line_read(&mut self) {
        self.lines_read += 1;
    }

    /// Fold in a flushed batch, failing if it does not account for every line.
    pub fn record_batch(
        &mut self,
        partition: &str,
        lines_read: usize,
        outcome: &LoadOutcome,
    ) -> Result<(), LoadError> {
        let lines_read = lines_read as u64;

        self.batches += 1;
        if outcome.fell_back {
            self.fallback_batches += 1;
        }
        self.rows_inserted += outcome.rows_inserted;
        self.duplicates_skipped += outcome.duplicates_skipped;

        if outcome.rows_accounted() != lines_read {
            return Err(LoadError::BatchMismatch {
                partition: partition.to_string(),
                lines_read,
                rows_accounted: outcome.rows_accounted(),
            });
        }

        Ok(())
    }

    /// Final check over the whole run.
    pub fn verify_totals(&self) -> Result<(), LoadError> {
        if self.rows_accounted() != self.lines_read {
            return Err(LoadError::TotalMismatch {
                lines_read: self.lines_read,
                rows_accounted: self.rows_accounted(),
            });
        }
        Ok(())
    }

    pub fn rows_accounted(&self) -> u64 {
        self.rows_inserted + self.duplicates_skipped
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Add the totals of another counter, e.g. one file of a multi-file run.
    pub fn merge(&mut self, other: &Reconciliation) {
        self.lines_read += other.lines_read;
        self.rows_inserted += other.rows_inserted;
        self.duplicates_skipped += other.duplicates_skipped;
        self.batches += other.batches;
        self.fallback_batches += other.fallback_batches;
    }

    pub fn summary(&self, files: usize) -> LoadSummary {
        LoadSummary {
            files,
            batches: self.batches,
            fallback_batches: self.fallback_batches,
            lines_read: self.lines_read,
            rows_inserted: self.rows_inserted,
            duplicates_skipped: self.duplicates_skipped,
        }
    }
}
