//! PostgreSQL implementation of the storage traits.
//!
//! `PgStore` owns the single transaction of a loader run. Savepoints are issued
//! as plain SQL on that transaction. Bulk transfers use `COPY ... FROM STDIN`
//! in text format.

use crate::models::{FORECAST_COLUMNS, ForecastRecord, WeightRow};
use crate::store::{
    RecordSink, StoreError, TransactionalStore, WeightSink, qualified_table, quote_ident,
};
use sqlx::{PgPool, Postgres, Transaction};

pub struct PgStore {
    pool: PgPool,
    schema: String,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStore {
    /// Open the enclosing transaction for a run.
    ///
    /// `schema` qualifies every forecast table name handed to the sink.
    pub async fn begin(pool: PgPool, schema: impl Into<String>) -> Result<Self, StoreError> {
        let tx = pool.begin().await?;
        Ok(Self {
            pool,
            schema: schema.into(),
            tx: Some(tx),
        })
    }

    /// Commit the open transaction and end the run.
    pub async fn finish(mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }

    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        self.tx.as_mut().ok_or(StoreError::TransactionClosed)
    }

    async fn execute(&mut self, sql: &str) -> Result<(), StoreError> {
        let tx = self.tx()?;
        sqlx::query(sql).execute(&mut **tx).await?;
        Ok(())
    }
}

impl TransactionalStore for PgStore {
    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.execute(&format!("SAVEPOINT {}", quote_ident(name))).await
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.execute(&format!("RELEASE SAVEPOINT {}", quote_ident(name)))
            .await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.execute(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)))
            .await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.commit().await?;
        log::debug!("transaction committed, opening the next one");
        self.tx = Some(self.pool.begin().await?);
        Ok(())
    }
}

impl RecordSink for PgStore {
    async fn copy_rows(&mut self, table: &str, payload: &str) -> Result<u64, StoreError> {
        let statement = format!(
            "COPY {} ({}) FROM STDIN",
            qualified_table(&self.schema, table),
            FORECAST_COLUMNS
        );

        let tx = self.tx()?;
        let mut copy = tx.copy_in_raw(&statement).await?;

        let sent = copy.send(payload.as_bytes()).await.map(|_| ());
        if let Err(err) = sent {
            if let Err(abort_err) = copy.abort("payload transfer failed").await {
                log::debug!("COPY abort after failed send reported: {}", abort_err);
            }
            return Err(err.into());
        }

        let rows = copy.finish().await?;
        Ok(rows)
    }

    async fn insert_record(
        &mut self,
        table: &str,
        record: &ForecastRecord,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7::numeric)",
            qualified_table(&self.schema, table),
            FORECAST_COLUMNS
        );

        let tx = self.tx()?;
        sqlx::query(&sql)
            .bind(record.station_id)
            .bind(record.analysis_time)
            .bind(record.forecast_period)
            .bind(record.parameter_id)
            .bind(record.level_id)
            .bind(record.level_value)
            .bind(&record.value)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }
}

impl WeightSink for PgStore {
    async fn insert_weight(&mut self, row: &WeightRow) -> Result<(), StoreError> {
        let tx = self.tx()?;
        sqlx::query(
            r#"INSERT INTO mos_weight (
                   mos_version_id, mos_period_id, analysis_hour, station_id, forecast_period,
                   target_param_id, target_level_id, target_level_value, weights
               )
               VALUES ($1, $2, $3, $4, make_interval(hours => $5), $6, 1, 0, $7::hstore)"#,
        )
        .bind(row.key.mos_version_id)
        .bind(row.mos_period_id)
        .bind(row.key.analysis_hour)
        .bind(row.key.station_id)
        .bind(row.key.forecast_period)
        .bind(row.key.target_param_id)
        .bind(row.hstore_literal())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn update_weight(&mut self, row: &WeightRow) -> Result<u64, StoreError> {
        let tx = self.tx()?;
        let result = sqlx::query(
            r#"UPDATE mos_weight
               SET weights = $1::hstore
               WHERE mos_version_id = $2
                 AND analysis_hour = $3
                 AND station_id = $4
                 AND forecast_period = make_interval(hours => $5)
                 AND target_param_id = $6
                 AND target_level_id = 1
                 AND target_level_value = 0"#,
        )
        .bind(row.hstore_literal())
        .bind(row.key.mos_version_id)
        .bind(row.key.analysis_hour)
        .bind(row.key.station_id)
        .bind(row.key.forecast_period)
        .bind(row.key.target_param_id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }
}
