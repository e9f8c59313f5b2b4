//! Id lookups for the factor loader.
//!
//! Version, parameter and station ids are read once at startup and handed to
//! the loader as an immutable [`LookupTables`] value.

use crate::error::LoadError;
use sqlx::PgPool;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct LookupTables {
    pub mos_version_id: i32,
    /// Parameter name -> parameter id.
    pub params: HashMap<String, i32>,
    /// Network-local station id -> station id.
    pub stations: HashMap<String, i32>,
}

impl LookupTables {
    /// Load all lookups for `mos_label` and stations of `network_id`.
    pub async fn load(pool: &PgPool, mos_label: &str, network_id: i32) -> Result<Self, LoadError> {
        let mos_version_id: Option<i32> =
            sqlx::query_scalar("SELECT id FROM mos_version WHERE label = $1")
                .bind(mos_label)
                .fetch_optional(pool)
                .await?;
        let mos_version_id = mos_version_id
            .ok_or_else(|| {
                LoadError::Lookup(format!("mos version not found for label {}", mos_label))
            })?;

        let params: Vec<(String, i32)> = sqlx::query_as("SELECT name, id FROM param")
            .fetch_all(pool)
            .await?;

        let stations: Vec<(String, i32)> = sqlx::query_as(
            r#"SELECT local_station_id::text, station_id
               FROM station_network_mapping
               WHERE network_id = $1"#,
        )
        .bind(network_id)
        .fetch_all(pool)
        .await?;

        log::info!(
            "lookups loaded: mos version {} (id {}), {} parameters, {} stations in network {}",
            mos_label,
            mos_version_id,
            params.len(),
            stations.len(),
            network_id
        );

        Ok(Self {
            mos_version_id,
            params: params.into_iter().collect(),
            stations: stations.into_iter().collect(),
        })
    }

    pub fn param_id(&self, name: &str) -> Result<i32, LoadError> {
        self.params
            .get(name)
            .copied()
            .ok_or_else(|| LoadError::Lookup(format!("parameter id not found for name {}", name)))
    }

    /// Station id for a network-local id, if the network knows it.
    pub fn station_id(&self, local_id: &str) -> Option<i32> {
        self.stations.get(local_id.trim()).copied()
    }
}
