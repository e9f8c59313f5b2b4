//! Partition-aware bulk loading of forecast records.
//!
//! # Pipeline
//!
//! - **`parser`**: streams records out of newline-delimited input files.
//! - **`partition`**: maps each station id to its per-decade partition table, or to the
//!   default table when that partition does not exist.
//! - **`batch`**: groups consecutive records bound for the same table, keeping a COPY
//!   payload and the structured rows side by side.
//! - **`bulk_loader`**: writes a batch with one COPY inside a savepoint and replays it
//!   row by row when the COPY hits existing rows.
//! - **`stats`**: reconciles lines read with rows inserted or skipped as duplicates.
//! - **`importer`**: drives files through the pipeline and owns the commit cadence.
//!
//! Everything runs on one connection and one transaction. A batch is fully loaded
//! before the next record is read, so memory use is bounded by a single batch.

pub mod batch;
pub mod bulk_loader;
pub mod importer;
pub mod parser;
pub mod partition;
pub mod stats;

pub use batch::{Batch, BatchAccumulator};
pub use bulk_loader::{BulkLoader, LoadOutcome};
pub use importer::ForecastImporter;
pub use parser::RecordReader;
pub use partition::{PartitionResolver, load_known_partitions};
pub use stats::Reconciliation;
