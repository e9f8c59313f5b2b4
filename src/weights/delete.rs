//! Filtered removal of stored weights.

use sqlx::PgPool;

/// Which weights to delete. `None` fields match every value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteFilter {
    pub mos_label: String,
    pub analysis_hour: Option<i32>,
    /// Network-local station id, resolved through `network_id`.
    pub station: Option<String>,
    pub network_id: i32,
    pub param: Option<String>,
    pub season: Option<i32>,
}

impl DeleteFilter {
    /// Build the DELETE statement with numbered placeholders for the set filters.
    pub fn to_sql(&self) -> String {
        let mut sql = String::from(
            "DELETE FROM mos_weight \
             WHERE mos_version_id = (SELECT id FROM mos_version WHERE label = $1)",
        );
        let mut next = 2;

        if self.analysis_hour.is_some() {
            sql.push_str(&format!(" AND analysis_hour = ${}", next));
            next += 1;
        }
        if self.station.is_some() {
            sql.push_str(&format!(
                " AND station_id = (SELECT station_id FROM station_network_mapping \
                 WHERE network_id = ${} AND local_station_id::text = ${})",
                next,
                next + 1
            ));
            next += 2;
        }
        if self.param.is_some() {
            sql.push_str(&format!(
                " AND target_param_id = (SELECT id FROM param WHERE name = ${})",
                next
            ));
            next += 1;
        }
        if self.season.is_some() {
            sql.push_str(&format!(" AND mos_period_id = ${}", next));
        }

        sql
    }

    /// Human-readable description of the filter for the confirmation prompt.
    pub fn describe(&self) -> String {
        fn or_all<T: ToString>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "all".to_string())
        }

        format!(
            "MOS label: {}\nanalysis_hour: {}\nstation: {} (network {})\nparam: {}\nseason: {}",
            self.mos_label,
            or_all(&self.analysis_hour),
            or_all(&self.station),
            self.network_id,
            or_all(&self.param),
            or_all(&self.season)
        )
    }
}

/// Delete every weight matching `filter`, returning the number of rows removed.
pub async fn delete_weights(pool: &PgPool, filter: &DeleteFilter) -> Result<u64, sqlx::Error> {
    let sql = filter.to_sql();
    let mut query = sqlx::query(&sql).bind(&filter.mos_label);

    if let Some(hour) = filter.analysis_hour {
        query = query.bind(hour);
    }
    if let Some(station) = &filter.station {
        query = query.bind(filter.network_id).bind(station);
    }
    if let Some(param) = &filter.param {
        query = query.bind(param);
    }
    if let Some(season) = filter.season {
        query = query.bind(season);
    }

    let result = query.execute(pool).await?;
    log::info!("{} weight rows deleted", result.rows_affected());
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_only_filter() {
        let filter = DeleteFilter {
            mos_label: "MOS-1".to_string(),
            network_id: 1,
            ..DeleteFilter::default()
        };
        let sql = filter.to_sql();
        assert!(sql.ends_with("WHERE label = $1)"));
        assert!(filter.describe().contains("analysis_hour: all"));
    }

    #[test]
    fn placeholders_follow_set_filters() {
        let filter = DeleteFilter {
            mos_label: "MOS-1".to_string(),
            analysis_hour: None,
            station: Some("2974".to_string()),
            network_id: 5,
            param: Some("T-K".to_string()),
            season: Some(3),
        };
        let sql = filter.to_sql();
        assert!(sql.contains("network_id = $2 AND local_station_id::text = $3"));
        assert!(sql.contains("WHERE name = $4"));
        assert!(sql.ends_with("mos_period_id = $5"));
    }
}
