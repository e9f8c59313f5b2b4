pub mod config;
pub mod db;
pub mod error;
pub mod load;
pub mod models;
pub mod store;
pub mod weights;

use env_logger::Env;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Install the process logger. `RUST_LOG` overrides the default filter.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info,sqlx=warn")).init();
    });
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::models::{ForecastRecord, TIMESTAMP_FORMAT, WeightKey, WeightRow};
    use crate::store::{RecordSink, StoreError, TransactionalStore, WeightSink};
    use chrono::NaiveDateTime;
    use std::collections::{BTreeMap, HashMap, HashSet};

    pub use database::{TestDatabase, TestDatabaseError};

    /// (station, analysis time, period, parameter, level, level value)
    type RowKey = (i32, NaiveDateTime, i32, i32, i32, i32);

    #[derive(Debug, Clone, Default)]
    struct Snapshot {
        rows: HashMap<String, BTreeMap<RowKey, String>>,
        weights: BTreeMap<WeightKey, (i32, BTreeMap<String, String>)>,
    }

    /// In-memory store with PostgreSQL transaction semantics.
    ///
    /// Any failed statement aborts the transaction until a savepoint rollback.
    /// Unique keys mirror the forecast and weight table constraints. Stations
    /// registered with [`MemoryStore::fail_station`] raise a non-conflict error.
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        current: Snapshot,
        committed: Snapshot,
        savepoints: Vec<(String, Snapshot)>,
        aborted: bool,
        failing_stations: HashSet<i32>,
        copy_calls: usize,
        insert_calls: usize,
        commits: usize,
    }

    fn record_key(record: &ForecastRecord) -> RowKey {
        (
            record.station_id,
            record.analysis_time,
            record.forecast_period,
            record.parameter_id,
            record.level_id,
            record.level_value,
        )
    }

    fn parse_copy_line(line: &str) -> Result<ForecastRecord, String> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 7 {
            return Err(format!("expected 7 columns, found {}", fields.len()));
        }
        let int = |i: usize| {
            fields[i]
                .parse::<i32>()
                .map_err(|e| format!("column {}: {}", i + 1, e))
        };

        Ok(ForecastRecord {
            station_id: int(0)?,
            analysis_time: NaiveDateTime::parse_from_str(fields[1], TIMESTAMP_FORMAT)
                .map_err(|e| format!("column 2: {}", e))?,
            forecast_period: int(2)?,
            parameter_id: int(3)?,
            level_id: int(4)?,
            level_value: int(5)?,
            value: fields[6].to_string(),
        })
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Store a row directly, bypassing call counters and failure injection.
        pub fn seed_record(&mut self, table: &str, record: &ForecastRecord) {
            self.current
                .rows
                .entry(table.to_string())
                .or_default()
                .insert(record_key(record), record.value.clone());
        }

        /// Make every write touching `station_id` fail with a backend error.
        pub fn fail_station(&mut self, station_id: i32) {
            self.failing_stations.insert(station_id);
        }

        /// Commit synchronously.
        pub fn commit_now(&mut self) {
            self.committed = self.current.clone();
            self.savepoints.clear();
            self.commits += 1;
        }

        pub fn mark_aborted(&mut self) {
            self.aborted = true;
        }

        pub fn is_aborted(&self) -> bool {
            self.aborted
        }

        pub fn open_savepoints(&self) -> usize {
            self.savepoints.len()
        }

        pub fn row_count(&self, table: &str) -> usize {
            self.current.rows.get(table).map_or(0, BTreeMap::len)
        }

        pub fn committed_row_count(&self, table: &str) -> usize {
            self.committed.rows.get(table).map_or(0, BTreeMap::len)
        }

        pub fn copy_calls(&self) -> usize {
            self.copy_calls
        }

        pub fn insert_calls(&self) -> usize {
            self.insert_calls
        }

        pub fn commits(&self) -> usize {
            self.commits
        }

        pub fn weight_count(&self) -> usize {
            self.current.weights.len()
        }

        pub fn weight(&self, key: &WeightKey) -> Option<BTreeMap<String, String>> {
            self.current.weights.get(key).map(|(_, weights)| weights.clone())
        }

        fn ensure_open(&self) -> Result<(), StoreError> {
            if self.aborted {
                return Err(StoreError::Backend(
                    "current transaction is aborted, commands ignored until end of transaction block"
                        .to_string(),
                ));
            }
            Ok(())
        }

        fn fail(&mut self, err: StoreError) -> StoreError {
            self.aborted = true;
            err
        }

        fn check_station(&mut self, station_id: i32) -> Result<(), StoreError> {
            if self.failing_stations.contains(&station_id) {
                return Err(self.fail(StoreError::Backend(format!(
                    "injected failure for station {}",
                    station_id
                ))));
            }
            Ok(())
        }

        fn conflict(&mut self, detail: String) -> StoreError {
            self.fail(StoreError::UniqueViolation {
                constraint: Some("memory_pkey".to_string()),
                message: format!("duplicate key value violates unique constraint: {}", detail),
            })
        }

        fn savepoint_index(&self, name: &str) -> Result<usize, StoreError> {
            self.savepoints
                .iter()
                .rposition(|(open, _)| open == name)
                .ok_or_else(|| {
                    StoreError::Backend(format!("savepoint \"{}\" does not exist", name))
                })
        }
    }

    impl TransactionalStore for MemoryStore {
        async fn savepoint(&mut self, name: &str) -> Result<(), StoreError> {
            self.ensure_open()?;
            self.savepoints.push((name.to_string(), self.current.clone()));
            Ok(())
        }

        async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
            self.ensure_open()?;
            let index = self.savepoint_index(name)?;
            self.savepoints.truncate(index);
            Ok(())
        }

        async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
            let index = self.savepoint_index(name)?;
            self.current = self.savepoints[index].1.clone();
            self.savepoints.truncate(index + 1);
            self.aborted = false;
            Ok(())
        }

        async fn commit(&mut self) -> Result<(), StoreError> {
            self.ensure_open()?;
            self.commit_now();
            Ok(())
        }
    }

    impl RecordSink for MemoryStore {
        async fn copy_rows(&mut self, table: &str, payload: &str) -> Result<u64, StoreError> {
            self.ensure_open()?;
            self.copy_calls += 1;

            let mut staged: BTreeMap<RowKey, String> = BTreeMap::new();
            for line in payload.lines() {
                let record = match parse_copy_line(line) {
                    Ok(record) => record,
                    Err(reason) => return Err(self.fail(StoreError::Backend(reason))),
                };
                self.check_station(record.station_id)?;

                let key = record_key(&record);
                let exists = self
                    .current
                    .rows
                    .get(table)
                    .is_some_and(|rows| rows.contains_key(&key));
                if exists || staged.contains_key(&key) {
                    return Err(self.conflict(format!("{:?}", key)));
                }
                staged.insert(key, record.value);
            }

            let count = staged.len() as u64;
            self.current
                .rows
                .entry(table.to_string())
                .or_default()
                .extend(staged);
            Ok(count)
        }

        async fn insert_record(
            &mut self,
            table: &str,
            record: &ForecastRecord,
        ) -> Result<(), StoreError> {
            self.ensure_open()?;
            self.insert_calls += 1;
            self.check_station(record.station_id)?;

            let key = record_key(record);
            let rows = self.current.rows.entry(table.to_string()).or_default();
            if rows.contains_key(&key) {
                return Err(self.conflict(format!("{:?}", key)));
            }
            rows.insert(key, record.value.clone());
            Ok(())
        }
    }

    impl WeightSink for MemoryStore {
        async fn insert_weight(&mut self, row: &WeightRow) -> Result<(), StoreError> {
            self.ensure_open()?;
            self.check_station(row.key.station_id)?;

            if self.current.weights.contains_key(&row.key) {
                return Err(self.conflict(format!("{:?}", row.key)));
            }
            self.current
                .weights
                .insert(row.key, (row.mos_period_id, row.weights.clone()));
            Ok(())
        }

        async fn update_weight(&mut self, row: &WeightRow) -> Result<u64, StoreError> {
            self.ensure_open()?;
            match self.current.weights.get_mut(&row.key) {
                Some((_, weights)) => {
                    *weights = row.weights.clone();
                    Ok(1)
                }
                None => Ok(0),
            }
        }
    }

    pub mod database {
        use log::LevelFilter;
        use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use sqlx::{ConnectOptions, Connection, PgPool};
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database with the MOS schema applied.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Use the server at `TEST_DATABASE_URL` when set, otherwise launch a
            /// disposable Postgres container.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                match std::env::var("TEST_DATABASE_URL") {
                    Ok(url) => Self::with_server(&url, None).await,
                    Err(_) => Self::new().await,
                }
            }

            /// Provision a fresh database inside a new Postgres container.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = Postgres::default().start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                Self::with_server(&admin_url, Some(container)).await
            }

            async fn with_server(
                admin_url: &str,
                container: Option<ContainerAsync<Postgres>>,
            ) -> Result<Self, TestDatabaseError> {
                let base_options: PgConnectOptions = admin_url.parse()?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "postgres".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await?;

                let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql).execute(&admin_pool).await?;
                admin_pool.close().await;

                // loaders hold one connection per run, mirror that here
                let pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(base_options.clone().database(&new_db_name))
                    .await?;

                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    container,
                })
            }

            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close the pool and remove the per-test database. A container, if
            /// any, is stopped when `self` goes out of scope.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }
                remove_database(self.admin_options.clone(), &self.database_name).await?;
                Ok(())
            }
        }

        /// Disconnect remaining sessions, then drop `name`.
        async fn remove_database(admin: PgConnectOptions, name: &str) -> Result<(), sqlx::Error> {
            let mut conn = admin.connect().await?;

            sqlx::query(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                 WHERE datname = $1 AND pid <> pg_backend_pid()",
            )
            .bind(name)
            .execute(&mut conn)
            .await?;
            sqlx::query(&format!("DROP DATABASE IF EXISTS \"{}\"", name))
                .execute(&mut conn)
                .await?;

            conn.close().await
        }

        impl Drop for TestDatabase {
            // Containers take their databases with them; only databases on an
            // external server need removing when a test bails out early.
            fn drop(&mut self) {
                let Some(pool) = self.pool.take() else {
                    return;
                };
                if self.container.is_some() {
                    return;
                }

                let admin = self.admin_options.clone();
                let name = self.database_name.clone();
                if let Ok(handle) = Handle::try_current() {
                    handle.spawn(async move {
                        pool.close().await;
                        if let Err(err) = remove_database(admin, &name).await {
                            log::warn!("leaving test database {} behind: {}", name, err);
                        }
                    });
                }
            }
        }
    }

}
