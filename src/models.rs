use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Timestamp layout used when handing `analysis_time` to PostgreSQL.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ===== Forecast Models (partitioned by station) =====

/// One forecast observation as read from an importer input line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub analysis_time: NaiveDateTime,
    pub forecast_period: i32,
    pub station_id: i32,
    pub parameter_id: i32,
    pub level_id: i32,
    pub level_value: i32,
    /// Numeric value kept in its source spelling so no precision is lost on the way in.
    pub value: String,
}

impl ForecastRecord {
    /// Append this record to a `COPY ... FROM STDIN` text-format payload.
    ///
    /// Column order matches [`FORECAST_COLUMNS`].
    pub fn write_copy_line(&self, out: &mut String) {
        // writing into a String cannot fail
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.station_id,
            self.analysis_time.format(TIMESTAMP_FORMAT),
            self.forecast_period,
            self.parameter_id,
            self.level_id,
            self.level_value,
            self.value,
        );
    }
}

/// Target columns for forecast inserts, in COPY payload order.
pub const FORECAST_COLUMNS: &str =
    "station_id, analysis_time, forecast_period, parameter_id, level_id, level_value, value";

// ===== Weight Models =====

/// Composite uniqueness key of a stored weight row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WeightKey {
    pub mos_version_id: i32,
    pub analysis_hour: i32,
    pub station_id: i32,
    pub forecast_period: i32,
    pub target_param_id: i32,
}

/// Coefficients of one forecast step, ready to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRow {
    pub key: WeightKey,
    pub mos_period_id: i32,
    /// Model term (storage element key) -> coefficient as written in the source file.
    pub weights: BTreeMap<String, String>,
}

impl WeightRow {
    /// True when every coefficient is numerically zero.
    ///
    /// Coefficients that are not numbers never count as zero.
    pub fn is_all_zero(&self) -> bool {
        !self.weights.is_empty()
            && self
                .weights
                .values()
                .all(|value| matches!(value.trim().parse::<f64>(), Ok(v) if v == 0.0))
    }

    /// Render the coefficient map as an `hstore` input literal.
    pub fn hstore_literal(&self) -> String {
        self.weights
            .iter()
            .map(|(key, value)| format!("\"{}\"=>\"{}\"", escape_hstore(key), escape_hstore(value)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn escape_hstore(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

// ===== Run Summaries =====

/// Totals reported at the end of an importer run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub files: usize,
    pub batches: u64,
    pub fallback_batches: u64,
    pub lines_read: u64,
    pub rows_inserted: u64,
    pub duplicates_skipped: u64,
}

/// Totals reported at the end of a factor loader run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WeightSummary {
    pub files: usize,
    pub skipped_files: usize,
    pub steps_read: u64,
    pub inserted: u64,
    pub updated: u64,
    pub zero_steps_dropped: u64,
}

impl WeightSummary {
    pub fn merge(&mut self, other: &WeightSummary) {
        self.files += other.files;
        self.skipped_files += other.skipped_files;
        self.steps_read += other.steps_read;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.zero_steps_dropped += other.zero_steps_dropped;
    }
}
