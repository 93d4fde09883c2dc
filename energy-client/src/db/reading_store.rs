use std::{path::Path, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous},
    FromRow,
};

use crate::domain::{timestamp, Reading, TimeRange};

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid stored timestamp '{0}'")]
    CorruptTimestamp(String),
}

#[derive(Debug, FromRow)]
struct ReadingRow {
    ts: String,
    power: f64,
    current: f64,
    voltage: f64,
    kwh: f64,
}

impl TryFrom<ReadingRow> for Reading {
    type Error = StorageError;

    fn try_from(row: ReadingRow) -> Result<Self, Self::Error> {
        let ts = timestamp::parse(&row.ts).map_err(|_| StorageError::CorruptTimestamp(row.ts.clone()))?;
        Ok(Reading {
            ts,
            power: row.power,
            current: row.current,
            voltage: row.voltage,
            kwh: row.kwh,
        })
    }
}

/// Durable time series of readings, keyed by timestamp.
///
/// Backed by SQLite in WAL mode: writes are single statements, so a
/// concurrent reader sees either the old row or the new one.
#[derive(Clone)]
pub struct ReadingStore {
    pool: SqlitePool,
}

impl ReadingStore {
    /// Open (creating if needed) the database file at `path` and ensure the
    /// `readings` table exists.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if it is missing.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS readings (
                ts      TEXT PRIMARY KEY,
                power   REAL NOT NULL,
                current REAL NOT NULL,
                voltage REAL NOT NULL,
                kwh     REAL NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Insert `reading`, replacing any existing row with the same timestamp.
    pub async fn upsert(&self, reading: &Reading) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO readings (ts, power, current, voltage, kwh)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(ts) DO UPDATE SET
                power   = excluded.power,
                current = excluded.current,
                voltage = excluded.voltage,
                kwh     = excluded.kwh
            "#,
        )
        .bind(reading.ts_key())
        .bind(reading.power)
        .bind(reading.current)
        .bind(reading.voltage)
        .bind(reading.kwh)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All readings with `start <= ts <= end`, oldest first.
    pub async fn query(&self, range: TimeRange) -> Result<Vec<Reading>, StorageError> {
        let (start, end) = range.keys();
        let rows = sqlx::query_as::<_, ReadingRow>(
            r#"
            SELECT ts, power, current, voltage, kwh
            FROM readings
            WHERE ts BETWEEN ?1 AND ?2
            ORDER BY ts
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Reading::try_from).collect()
    }

    /// Number of readings in the inclusive range and the sum of their energy.
    pub async fn count_and_sum(&self, range: TimeRange) -> Result<(u64, f64), StorageError> {
        let (start, end) = range.keys();
        let (count, total): (i64, f64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(kwh), 0.0)
            FROM readings
            WHERE ts BETWEEN ?1 AND ?2
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok((count.max(0) as u64, total))
    }

    /// Most recent reading, if any.
    pub async fn latest(&self) -> Result<Option<Reading>, StorageError> {
        let row = sqlx::query_as::<_, ReadingRow>(
            r#"
            SELECT ts, power, current, voltage, kwh
            FROM readings
            ORDER BY ts DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(Reading::try_from).transpose()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
