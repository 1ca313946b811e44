//! Append-only persistence of observation batches.

mod rows;

pub use rows::{PairRow, TableRow};

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Rows per multi-row `INSERT`.
const CHUNK_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("batch of {attempted} rows rejected by table {table}")]
    Database {
        table: String,
        attempted: usize,
        #[source]
        source: sqlx::Error,
    },

    #[error("invalid table name `{0}`")]
    InvalidTable(String),
}

impl LoadError {
    /// Rows in the rejected batch; none of them were committed.
    pub fn attempted(&self) -> usize {
        match self {
            LoadError::Database { attempted, .. } => *attempted,
            LoadError::InvalidTable(_) => 0,
        }
    }

    /// The store itself is unusable, as opposed to this batch being bad.
    pub fn is_systemic(&self) -> bool {
        match self {
            LoadError::Database { source, .. } => matches!(
                source,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Configuration(_)
            ),
            LoadError::InvalidTable(_) => true,
        }
    }
}

/// Destination table names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tables {
    pub lanes: String,
    pub pairs: String,
    pub flows: String,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            lanes: "vd_data".to_string(),
            pairs: "etag_data".to_string(),
            flows: "station_flow".to_string(),
        }
    }
}

fn connect_options(url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30)))
}

/// Opens a pool and verifies the store is reachable.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(connect_options(url)?)
        .await?;
    sqlx::query("SELECT 1").execute(&pool).await?;
    Ok(pool)
}

/// A pool that connects on first use, for commands that may never write.
pub fn connect_lazy(url: &str) -> Result<SqlitePool, sqlx::Error> {
    Ok(SqlitePoolOptions::new()
        .max_connections(1)
        .connect_lazy_with(connect_options(url)?))
}

/// Creates the three destination tables and their bucket indexes when absent.
pub async fn ensure_schema(pool: &SqlitePool, tables: &Tables) -> Result<(), LoadError> {
    for table in [&tables.lanes, &tables.pairs, &tables.flows] {
        validate_table(table)?;
    }

    let statements = [
        format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                update_time TIMESTAMP,
                station_id VARCHAR(64) NOT NULL,
                lane_id VARCHAR(16) NOT NULL,
                lane_type VARCHAR(16),
                speed REAL,
                occupancy REAL,
                volume INTEGER,
                date DATE NOT NULL,
                hour INTEGER NOT NULL,
                minute INTEGER NOT NULL
            )",
            t = tables.lanes
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{t}_bucket ON {t} (station_id, date, hour, minute)",
            t = tables.lanes
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                update_time TIMESTAMP,
                pair_id VARCHAR(64) NOT NULL,
                from_station VARCHAR(32) NOT NULL,
                to_station VARCHAR(32) NOT NULL,
                travel_time REAL,
                speed REAL,
                vehicle_count INTEGER,
                date DATE NOT NULL,
                hour INTEGER NOT NULL,
                minute INTEGER NOT NULL
            )",
            t = tables.pairs
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{t}_bucket ON {t} (from_station, to_station, date, hour, minute)",
            t = tables.pairs
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                station_key VARCHAR(32) NOT NULL,
                station_index INTEGER NOT NULL,
                date DATE NOT NULL,
                hour INTEGER NOT NULL,
                minute INTEGER NOT NULL,
                total_vehicle_count INTEGER NOT NULL,
                travel_time REAL,
                speed REAL
            )",
            t = tables.flows
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{t}_bucket ON {t} (station_key, date, hour, minute)",
            t = tables.flows
        ),
    ];

    for statement in &statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|source| LoadError::Database {
                table: "schema".to_string(),
                attempted: 0,
                source,
            })?;
    }

    info!(lanes = %tables.lanes, pairs = %tables.pairs, flows = %tables.flows, "Schema ready");
    Ok(())
}

/// Appends batches to a table. There is no merge or de-duplication: loading
/// the same batch twice stores every row twice.
#[derive(Debug, Clone)]
pub struct Loader {
    pool: SqlitePool,
}

impl Loader {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Writes `records` to `table` in one transaction and returns the row
    /// count. An empty batch returns 0 without touching the store; any
    /// failure rolls the whole batch back.
    pub async fn load<R: TableRow>(&self, records: &[R], table: &str) -> Result<u64, LoadError> {
        validate_table(table)?;
        if records.is_empty() {
            return Ok(0);
        }

        let rejected = |source: sqlx::Error| LoadError::Database {
            table: table.to_string(),
            attempted: records.len(),
            source,
        };

        let mut transaction = self.pool.begin().await.map_err(rejected)?;
        let mut written = 0;

        for chunk in records.chunks(CHUNK_SIZE) {
            let mut qb = QueryBuilder::<Sqlite>::new(format!(
                "INSERT INTO {table} ({}) ",
                R::COLUMNS.join(", ")
            ));
            qb.push_values(chunk, |mut row, record| record.bind_row(&mut row));

            // Dropping the transaction on error rolls back earlier chunks.
            let result = qb.build().execute(&mut *transaction).await.map_err(rejected)?;
            written += result.rows_affected();
        }

        transaction.commit().await.map_err(rejected)?;
        debug!(table, rows = written, "Batch loaded");
        Ok(written)
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table(table: &str) -> Result<(), LoadError> {
    let valid = table
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(LoadError::InvalidTable(table.to_string()))
    }
}
