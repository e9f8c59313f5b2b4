//! Insert-or-update of weight rows.
//!
//! Each forecast step is inserted inside its own savepoint. When the composite
//! key already exists the insert is rolled back and the stored coefficients are
//! overwritten instead. Steps whose coefficients are all zero are dropped before
//! any statement is issued.

use crate::models::{WeightKey, WeightRow, WeightSummary};
use crate::store::{StoreError, WeightSink, within_savepoint};
use crate::weights::factor_csv::FactorTable;

const WEIGHT_SAVEPOINT: &str = "weight_row";

/// Key fields shared by every step of one factor file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightTarget {
    pub mos_version_id: i32,
    pub mos_period_id: i32,
    pub analysis_hour: i32,
    pub station_id: i32,
    pub target_param_id: i32,
}

impl WeightTarget {
    /// Build the rows for every step of `table`, in period order.
    pub fn rows(&self, table: &FactorTable) -> Vec<WeightRow> {
        table
            .iter()
            .map(|(period, weights)| WeightRow {
                key: WeightKey {
                    mos_version_id: self.mos_version_id,
                    analysis_hour: self.analysis_hour,
                    station_id: self.station_id,
                    forecast_period: *period,
                    target_param_id: self.target_param_id,
                },
                mos_period_id: self.mos_period_id,
                weights: weights.clone(),
            })
            .collect()
    }
}

/// Write every non-zero step of `table`.
pub async fn upsert_weights<S: WeightSink>(
    store: &mut S,
    target: &WeightTarget,
    table: &FactorTable,
) -> Result<WeightSummary, StoreError> {
    let mut summary = WeightSummary::default();

    for row in target.rows(table) {
        summary.steps_read += 1;

        if row.is_all_zero() {
            log::trace!(
                "dropping all-zero step {} for station {}",
                row.key.forecast_period,
                row.key.station_id
            );
            summary.zero_steps_dropped += 1;
            continue;
        }

        let inserted = within_savepoint(store, WEIGHT_SAVEPOINT, async |s: &mut S| {
            s.insert_weight(&row).await
        })
        .await;

        match inserted {
            Ok(()) => summary.inserted += 1,
            Err(err) if err.is_unique_violation() => {
                let updated = store.update_weight(&row).await?;
                if updated == 0 {
                    log::warn!(
                        "weights for station {} step {} conflicted but no row matched the update",
                        row.key.station_id,
                        row.key.forecast_period
                    );
                }
                summary.updated += 1;
            }
            Err(err) => return Err(err),
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;
    use std::collections::BTreeMap;

    fn target() -> WeightTarget {
        WeightTarget {
            mos_version_id: 1,
            mos_period_id: 1,
            analysis_hour: 12,
            station_id: 100_971,
            target_param_id: 4,
        }
    }

    fn table(steps: &[(i32, &[(&str, &str)])]) -> FactorTable {
        steps
            .iter()
            .map(|(period, values)| {
                let weights: BTreeMap<String, String> = values
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                (*period, weights)
            })
            .collect()
    }

    #[tokio::test]
    async fn inserts_new_steps_and_drops_zero_ones() {
        let mut store = MemoryStore::new();
        let factors = table(&[
            (3, &[("INTERCEPT-N/NOLEVEL/0", "1.2"), ("T-K/GROUND/0", "0.9")]),
            (6, &[("INTERCEPT-N/NOLEVEL/0", "0"), ("T-K/GROUND/0", "0")]),
        ]);

        let summary = upsert_weights(&mut store, &target(), &factors).await.unwrap();

        assert_eq!(summary.steps_read, 2);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.zero_steps_dropped, 1);
        assert_eq!(store.weight_count(), 1);
    }

    #[tokio::test]
    async fn existing_key_is_updated_in_place() {
        let mut store = MemoryStore::new();
        let first = table(&[(3, &[("T-K/GROUND/0", "0.9")])]);
        let second = table(&[(3, &[("T-K/GROUND/0", "0.8")])]);

        upsert_weights(&mut store, &target(), &first).await.unwrap();
        let summary = upsert_weights(&mut store, &target(), &second).await.unwrap();

        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.updated, 1);
        assert_eq!(store.weight_count(), 1);

        let stored = store.weight(&target().rows(&second)[0].key).unwrap();
        assert_eq!(stored["T-K/GROUND/0"], "0.8");
        assert!(!store.is_aborted());
    }

    #[tokio::test]
    async fn all_zero_step_never_reaches_storage() {
        let mut store = MemoryStore::new();
        let zeros = table(&[(3, &[("T-K/GROUND/0", "0"), ("TD-K/GROUND/0", "0.0")])]);

        let summary = upsert_weights(&mut store, &target(), &zeros).await.unwrap();

        assert_eq!(summary.zero_steps_dropped, 1);
        assert_eq!(store.weight_count(), 0);
        assert_eq!(store.open_savepoints(), 0);
    }

    #[tokio::test]
    async fn other_errors_are_fatal() {
        let mut store = MemoryStore::new();
        store.fail_station(100_971);
        let factors = table(&[(3, &[("T-K/GROUND/0", "0.9")])]);

        let err = upsert_weights(&mut store, &target(), &factors).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
