//! Partition routing for forecast tables.
//!
//! Forecast rows are spread over per-decade station partitions named
//! `{prefix}_p{decade}`, where the decade is the station id rounded down to a
//! multiple of ten. Stations whose partition does not exist land in the
//! unpartitioned `{prefix}` table.
//!
//! The set of existing partitions is read once from the catalog at startup and
//! injected into [`PartitionResolver`]; it is never refreshed during a run.

use sqlx::PgPool;
use std::collections::HashSet;

/// Routes station ids to the table that stores their rows.
#[derive(Debug, Clone)]
pub struct PartitionResolver {
    prefix: String,
    known: HashSet<String>,
}

impl PartitionResolver {
    /// `prefix` doubles as the default table name.
    pub fn new(prefix: impl Into<String>, known: impl IntoIterator<Item = String>) -> Self {
        Self {
            prefix: prefix.into(),
            known: known.into_iter().collect(),
        }
    }

    /// The unpartitioned table used when no decade partition exists.
    pub fn default_table(&self) -> &str {
        &self.prefix
    }

    pub fn known_partitions(&self) -> usize {
        self.known.len()
    }

    /// Resolve the target table for `station_id`.
    pub fn resolve(&self, station_id: i32) -> String {
        let candidate = partition_name(&self.prefix, station_id);
        if self.known.contains(&candidate) {
            candidate
        } else {
            self.prefix.clone()
        }
    }
}

/// Per-decade partition name for a station, whether or not it exists.
pub fn partition_name(prefix: &str, station_id: i32) -> String {
    // widened so stations near i32::MIN round down without overflow
    let station_id = i64::from(station_id);
    let decade = if station_id % 10 == 0 {
        station_id
    } else {
        station_id.div_euclid(10) * 10
    };
    format!("{}_p{}", prefix, decade)
}

/// Load the names of all existing partitions of `prefix` in `schema`.
pub async fn load_known_partitions(
    pool: &PgPool,
    schema: &str,
    prefix: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let escaped = prefix
        .replace('\\', "\\\\")
        .replace('_', "\\_")
        .replace('%', "\\%");
    let pattern = format!("{}\\_p%", escaped);

    let partitions: Vec<String> = sqlx::query_scalar(
        r#"SELECT tablename::text
           FROM pg_tables
           WHERE schemaname = $1 AND tablename LIKE $2
           ORDER BY 1"#,
    )
    .bind(schema)
    .bind(&pattern)
    .fetch_all(pool)
    .await?;

    log::info!(
        "found {} partitions of {}.{}",
        partitions.len(),
        schema,
        prefix
    );
    Ok(partitions)
}
