//! Batch accumulation by partition.
//!
//! Consecutive records routed to the same table are collected into one
//! [`Batch`]. Each batch keeps the records twice: as a ready-to-send COPY
//! payload for the bulk path and as structured rows for the row-level
//! fallback, so a failed bulk attempt never requires re-reading the input.

use crate::models::ForecastRecord;

/// Records bound for a single table.
#[derive(Debug)]
pub struct Batch {
    partition: String,
    payload: String,
    rows: Vec<ForecastRecord>,
}

impl Batch {
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            payload: String::new(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, record: ForecastRecord) {
        record.write_copy_line(&mut self.payload);
        self.rows.push(record);
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// COPY text payload, one line per record.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn rows(&self) -> &[ForecastRecord] {
        &self.rows
    }

    /// Number of input lines held by this batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Groups a record stream into per-partition batches.
///
/// At most one batch is open at a time. [`push`](Self::push) hands back the
/// previous batch as soon as it is complete, either because the partition
/// changed or because the open batch reached the row limit.
#[derive(Debug)]
pub struct BatchAccumulator {
    max_rows: usize,
    current: Option<Batch>,
}

impl BatchAccumulator {
    pub fn new(max_rows: usize) -> Self {
        Self {
            max_rows: max_rows.max(1),
            current: None,
        }
    }

    /// Add `record` routed to `partition`, returning a completed batch if one
    /// had to be closed to make room.
    pub fn push(&mut self, partition: String, record: ForecastRecord) -> Option<Batch> {
        let must_close = self.current.as_ref().is_some_and(|open| {
            open.partition() != partition || open.len() >= self.max_rows
        });
        let completed = if must_close { self.current.take() } else { None };

        self.current
            .get_or_insert_with(|| Batch::new(partition))
            .push(record);

        completed
    }

    /// Close the trailing batch at end of input.
    pub fn finish(&mut self) -> Option<Batch> {
        self.current.take().filter(|batch| !batch.is_empty())
    }

    pub fn open_partition(&self) -> Option<&str> {
        self.current.as_ref().map(Batch::partition)
    }
}
