//! Factor CSV files produced by the MOS regression.
//!
//! Layout: a header row naming the forecast periods, then one row per model
//! term with one coefficient per period.
//!
//! ```text
//! "","3","6","9"
//! "Intercept",1.2,1.1,0.9
//! "T2",0.98,0.97,0.0
//! ```
//!
//! Term names are translated to storage element keys through [`PARAMETERS`].
//! File names carry the load metadata:
//! `station_<station>_<hour>_season<season>_<PARAM>_<anything>.csv`.

use crate::error::LoadError;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::LazyLock;

/// Coefficients per forecast period: period -> (element key -> coefficient).
pub type FactorTable = BTreeMap<i32, BTreeMap<String, String>>;

/// CSV term name -> `PARAM/LEVEL/LEVEL_VALUE[/TIME_STEP_ADJUSTMENT]`.
pub const PARAMETERS: &[(&str, &str)] = &[
    ("T2_ENSMEAN_MA1", "T-MEAN-K/GROUND/0/0/-1"),
    ("TA", "T-K/GROUND/0"),
    ("TAMAX12H", "TMAX12H-K/GROUND/0"),
    ("TAMIN12H", "TMIN12H-K/GROUND/0"),
    ("TD", "TD-K/GROUND/0"),
    ("DECLINATION", "DECLINATION-N/NOLEVEL/0"),
    ("Intercept", "INTERCEPT-N/NOLEVEL/0"),
    ("SD", "SD-M/GROUND/0"),
    ("MSL", "P-PA/MEANSEA/0"),
    ("T2", "T-K/GROUND/0"),
    ("T2_M1", "T-K/GROUND/0/-1"),
    ("D2", "TD-K/GROUND/0"),
    ("TP", "RR-KGM2/GROUND/0"),
    ("STR", "RNETLW-WM2/GROUND/0"),
    ("LCC", "NL-PRCNT/GROUND/0"),
    ("MCC", "NM-PRCNT/GROUND/0"),
    ("HCC", "NH-PRCNT/GROUND/0"),
    ("CIN", "CIN-JKG/GROUND/0"),
    ("CAPE", "CAPE-JKG/GROUND/0"),
    ("U10", "U-MS/GROUND/0"),
    ("V10", "V-MS/GROUND/0"),
    ("CP", "RRC-KGM2/GROUND/0"),
    ("LSP", "RRL-KGM2/GROUND/0"),
    ("SSHF", "FLSEN-JM2/GROUND/0"),
    ("STRD", "RADLW-WM2/GROUND/0"),
    ("FG10_3", "FFG3H-MS/GROUND/0"),
    ("SKT", "SKT-K/GROUND/0"),
    ("MX2T3", "TMAX3H-K/GROUND/0"),
    ("MN2T3", "TMIN3H-K/GROUND/0"),
    ("MX2T", "TMAX-K/GROUND/0"),
    ("MN2T", "TMIN-K/GROUND/0"),
    ("TCW", "TOTCW-KGM2/GROUND/0"),
    ("SLHF", "FLLAT-JM2/GROUND/0"),
    ("CBH", "CLDBASE-M/GROUND/0"),
    ("SSR", "RNETSW-WM2/GROUND/0"),
    ("BLH", "MIXHGT-M/GROUND/0"),
    ("DEG0", "H0C-M/GROUND/0"),
    ("GH_950", "Z-M2S2/PRESSURE/950"),
    ("GH_925", "Z-M2S2/PRESSURE/925"),
    ("GH_850", "Z-M2S2/PRESSURE/850"),
    ("GH_700", "Z-M2S2/PRESSURE/700"),
    ("GH_500", "Z-M2S2/PRESSURE/500"),
    ("RH_950", "RH-PRCNT/PRESSURE/950"),
    ("RH_925", "RH-PRCNT/PRESSURE/925"),
    ("RH_850", "RH-PRCNT/PRESSURE/850"),
    ("RH_700", "RH-PRCNT/PRESSURE/700"),
    ("RH_500", "RH-PRCNT/PRESSURE/500"),
    ("T_950", "T-K/PRESSURE/950"),
    ("T_950_M1", "T-K/PRESSURE/950/-1"),
    ("T_925_M1", "T-K/PRESSURE/925/-1"),
    ("T_925", "T-K/PRESSURE/925"),
    ("T_850", "T-K/PRESSURE/850"),
    ("T_700", "T-K/PRESSURE/700"),
    ("T_500", "T-K/PRESSURE/500"),
    ("W_950", "VV-PAS/PRESSURE/950"),
    ("W_925", "VV-PAS/PRESSURE/925"),
    ("W_850", "VV-PAS/PRESSURE/850"),
    ("W_700", "VV-PAS/PRESSURE/700"),
    ("W_500", "VV-PAS/PRESSURE/500"),
    ("Z_925", "Z-M2S2/PRESSURE/925"),
    ("Z_850", "Z-M2S2/PRESSURE/850"),
    ("Z_700", "Z-M2S2/PRESSURE/700"),
    ("Z_500", "Z-M2S2/PRESSURE/500"),
];

/// Element key for a CSV term name.
pub fn element_for(term: &str) -> Option<&'static str> {
    PARAMETERS
        .iter()
        .find(|(name, _)| *name == term)
        .map(|(_, element)| *element)
}

/// Database parameter name for a CSV term name (`"TA"` -> `"T-K"`).
pub fn database_param_for(term: &str) -> Option<&'static str> {
    element_for(term).and_then(|element| element.split('/').next())
}

static FILE_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^station_([^_]+)_(\d+)_season(\d+)_([^_.]+)").expect("valid file name pattern")
});

/// Load metadata carried by a factor file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactorFileMeta {
    /// Station id local to the selected network.
    pub station: Option<String>,
    pub analysis_hour: Option<i32>,
    pub season: Option<i32>,
    pub target_param: Option<String>,
}

impl FactorFileMeta {
    /// Extract what the file name provides; missing parts stay `None`.
    pub fn from_file_name(name: &str) -> Self {
        match FILE_NAME_PATTERN.captures(name) {
            Some(caps) => Self {
                station: Some(caps[1].to_string()),
                analysis_hour: caps[2].parse().ok(),
                season: caps[3].parse().ok(),
                target_param: Some(caps[4].to_string()),
            },
            None => Self::default(),
        }
    }

    /// Fill every field set in `overrides`, keeping the rest.
    pub fn with_overrides(self, overrides: &FactorFileMeta) -> Self {
        Self {
            station: overrides.station.clone().or(self.station),
            analysis_hour: overrides.analysis_hour.or(self.analysis_hour),
            season: overrides.season.or(self.season),
            target_param: overrides.target_param.clone().or(self.target_param),
        }
    }
}

/// Fully resolved metadata; every field present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorFileKey {
    pub station: String,
    pub analysis_hour: i32,
    pub season: i32,
    pub target_param: String,
}

impl FactorFileMeta {
    pub fn complete(self, source: &str) -> Result<FactorFileKey, LoadError> {
        let missing = |field: &str| {
            LoadError::malformed(
                source,
                format!("{} neither in file name nor on the command line", field),
            )
        };

        Ok(FactorFileKey {
            station: self.station.ok_or_else(|| missing("station"))?,
            analysis_hour: self.analysis_hour.ok_or_else(|| missing("analysis hour"))?,
            season: self.season.ok_or_else(|| missing("season"))?,
            target_param: self.target_param.ok_or_else(|| missing("target parameter"))?,
        })
    }
}

/// Read a factor file from disk.
pub fn read_factor_file(path: &Path) -> Result<FactorTable, LoadError> {
    let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
    parse_factor_table(&path.display().to_string(), BufReader::new(file))
}

/// Parse a factor table; `source` names the input in errors.
pub fn parse_factor_table<R: Read>(source: &str, reader: R) -> Result<FactorTable, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = rdr.records();
    let location = |line: u64| format!("{}:{}", source, line);

    let header = match records.next() {
        Some(header) => header.map_err(|e| LoadError::malformed(source, e.to_string()))?,
        None => return Err(LoadError::malformed(source, "empty factor file")),
    };

    let periods = header
        .iter()
        .skip(1)
        .map(|label| {
            label
                .parse::<i32>()
                .map_err(|_| {
                    LoadError::malformed(
                        location(1),
                        format!("period `{}` is not an integer", label),
                    )
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if periods.is_empty() {
        return Err(LoadError::malformed(location(1), "header names no forecast periods"));
    }

    let mut table = FactorTable::new();
    for record in records {
        let record = record.map_err(|e| LoadError::malformed(source, e.to_string()))?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        let term = record.get(0).unwrap_or_default();
        let element = element_for(term).ok_or_else(|| LoadError::UnknownParameter {
            name: term.to_string(),
            location: location(line),
        })?;

        let coefficients = record.len().saturating_sub(1);
        if coefficients != periods.len() {
            return Err(LoadError::malformed(
                location(line),
                format!(
                    "expected {} coefficients, found {}",
                    periods.len(),
                    coefficients
                ),
            ));
        }

        for (period, coefficient) in periods.iter().zip(record.iter().skip(1)) {
            table
                .entry(*period)
                .or_default()
                .insert(element.to_string(), coefficient.to_string());
        }
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_and_term_rows() {
        let text = "\"\",\"3\",\"6\"\n\"Intercept\",1.5,2.5\n\"T2\",0.9,0\n";
        let table = parse_factor_table("f.csv", text.as_bytes()).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table[&3]["INTERCEPT-N/NOLEVEL/0"], "1.5");
        assert_eq!(table[&3]["T-K/GROUND/0"], "0.9");
        assert_eq!(table[&6]["T-K/GROUND/0"], "0");
    }

    #[test]
    fn unknown_term_is_fatal() {
        let text = "\"\",\"3\"\n\"NOPE\",1\n";
        let err = parse_factor_table("f.csv", text.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            LoadError::UnknownParameter { ref name, ref location }
                if name == "NOPE" && location == "f.csv:2"
        ));
    }

    #[test]
    fn row_width_must_match_header() {
        let text = "\"\",\"3\",\"6\"\n\"TA\",1\n";
        let err = parse_factor_table("f.csv", text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("expected 2 coefficients, found 1"));
    }

    #[test]
    fn header_periods_must_be_integers() {
        let text = "\"\",\"three\"\n";
        assert!(parse_factor_table("f.csv", text.as_bytes()).is_err());
        assert!(parse_factor_table("f.csv", "".as_bytes()).is_err());
    }

    #[test]
    fn file_name_metadata() {
        let name = "station_8579_12_season1_TA_lm_MOS_constant_maxvars14.csv";
        let meta = FactorFileMeta::from_file_name(name);
        assert_eq!(meta.station.as_deref(), Some("8579"));
        assert_eq!(meta.analysis_hour, Some(12));
        assert_eq!(meta.season, Some(1));
        assert_eq!(meta.target_param.as_deref(), Some("TA"));

        assert_eq!(FactorFileMeta::from_file_name("weights.csv"), FactorFileMeta::default());
    }

    #[test]
    fn overrides_win_over_file_name() {
        let meta = FactorFileMeta::from_file_name("station_8579_12_season1_TA_x.csv");
        let overrides = FactorFileMeta {
            season: Some(3),
            ..FactorFileMeta::default()
        };
        let key = meta.with_overrides(&overrides).complete("x").unwrap();
        assert_eq!(key.season, 3);
        assert_eq!(key.analysis_hour, 12);
    }

    #[test]
    fn incomplete_metadata_is_reported() {
        let err = FactorFileMeta::default().complete("weights.csv").unwrap_err();
        assert!(err.to_string().contains("station"));
    }

    #[test]
    fn database_param_is_first_element_part() {
        assert_eq!(database_param_for("TA"), Some("T-K"));
        assert_eq!(database_param_for("GH_500"), Some("Z-M2S2"));
        assert_eq!(database_param_for("XYZ"), None);
    }
}
