//! Streaming reader for importer input files.
//!
//! Input is newline-delimited, comma-separated, without a header row:
//!
//! ```text
//! # analysis_time,forecast_period,station_id,parameter_id,level_id,level_value,value
//! 2024-03-01 00:00:00,6,2974,4,5,0,271.5
//! ```
//!
//! Lines starting with `#` and blank lines are skipped. Anything else must be a
//! well-formed record; the first malformed line ends the run.
//!
//! The reader is single-pass and lazy: records are produced one at a time from
//! the underlying file, which is decoded on the fly when it ends in `.gz`.

use crate::error::LoadError;
use crate::models::ForecastRecord;
use chrono::{DateTime, NaiveDateTime};
use csv::StringRecord;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Number of comma-separated fields in a record line.
pub const FIELD_COUNT: usize = 7;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y%m%d%H%M",
];

/// Lazy iterator of [`ForecastRecord`]s over one input source.
pub struct RecordReader {
    source: String,
    records: csv::StringRecordsIntoIter<Box<dyn Read>>,
}

impl RecordReader {
    /// Open `path`, transparently decompressing gzip input.
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        Ok(Self::from_reader(path.display().to_string(), reader))
    }

    /// Wrap an arbitrary byte source; `source` names it in error messages.
    pub fn from_reader(source: impl Into<String>, reader: Box<dyn Read>) -> Self {
        let records = csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader)
            .into_records();

        Self {
            source: source.into(),
            records,
        }
    }

    fn location(&self, record: &StringRecord) -> String {
        match record.position() {
            Some(pos) => format!("{}:{}", self.source, pos.line()),
            None => self.source.clone(),
        }
    }
}

impl Iterator for RecordReader {
    type Item = Result<ForecastRecord, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = loop {
            match self.records.next()? {
                Ok(record) if is_skipped(&record) => continue,
                Ok(record) => break record,
                Err(err) => {
                    let location = match err.position() {
                        Some(pos) => format!("{}:{}", self.source, pos.line()),
                        None => self.source.clone(),
                    };
                    return Some(Err(LoadError::malformed(location, err.to_string())));
                }
            }
        };

        let location = self.location(&record);
        Some(parse_record(&record).map_err(|reason| LoadError::malformed(location, reason)))
    }
}

/// Indented comments and whitespace-only lines. Fields are already trimmed, so
/// the reader's own comment handling only covers `#` in the first column.
fn is_skipped(record: &StringRecord) -> bool {
    match record.get(0) {
        Some(first) if first.starts_with('#') => true,
        Some(first) => record.len() == 1 && first.is_empty(),
        None => true,
    }
}

/// Parse one already-split input line.
pub fn parse_record(fields: &StringRecord) -> Result<ForecastRecord, String> {
    if fields.len() != FIELD_COUNT {
        return Err(format!(
            "expected {} fields, found {}",
            FIELD_COUNT,
            fields.len()
        ));
    }

    let analysis_time = parse_timestamp(&fields[0])?;
    let forecast_period = parse_int(&fields[1], "forecast_period")?;
    let station_id = parse_int(&fields[2], "station_id")?;
    let parameter_id = parse_int(&fields[3], "parameter_id")?;
    let level_id = parse_int(&fields[4], "level_id")?;
    let level_value = parse_int(&fields[5], "level_value")?;

    let value = fields[6].to_string();
    if value.parse::<f64>().is_err() {
        return Err(format!("value `{}` is not numeric", value));
    }

    Ok(ForecastRecord {
        analysis_time,
        forecast_period,
        station_id,
        parameter_id,
        level_id,
        level_value,
        value,
    })
}

fn parse_int(raw: &str, field: &str) -> Result<i32, String> {
    raw.parse::<i32>()
        .map_err(|_| format!("{} `{}` is not an integer", field, raw))
}

/// Parse an analysis time in any of the accepted layouts.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, String> {
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(ts);
        }
    }

    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.naive_utc())
        .map_err(|_| format!("analysis_time `{}` is not a recognised timestamp", raw))
}
