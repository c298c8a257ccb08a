//! SQLite-backed store using sqlx.
//!
//! Timestamps are stored as UTC epoch seconds so range predicates compare
//! integers. Backfill jobs are stored as a JSON payload keyed by job id.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use super::{FetchWindowRecord, MeasurementStore};
use crate::domain::{BackfillJob, Measurement, TimeWindow};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create the database behind a `sqlite://` URL.
    pub async fn connect(url: &str) -> Result<Self> {
        if let Some(path) = url.strip_prefix("sqlite://").filter(|p| !p.contains(":memory:")) {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create database directory {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url '{url}'"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to open SQLite database")?;

        migrate(&pool).await?;
        info!(%url, "SQLite store ready");
        Ok(Self { pool })
    }

    /// Private in-memory database; one connection so every query sees the same data.
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().filename(":memory:").create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        migrate(&pool).await?;
        Ok(Self { pool })
    }
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS measurements (
            station_id TEXT NOT NULL,
            measured_at INTEGER NOT NULL,
            station_name TEXT NOT NULL DEFAULT '',
            temperature_c REAL,
            pressure_hpa REAL,
            speed_mps REAL,
            direction_deg REAL,
            latitude REAL,
            longitude REAL,
            altitude_m REAL,
            PRIMARY KEY (station_id, measured_at)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fetch_windows (
            station_id TEXT NOT NULL,
            start_utc INTEGER NOT NULL,
            end_utc INTEGER NOT NULL,
            fetched_at INTEGER NOT NULL,
            direction_checked INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (station_id, start_utc, end_utc)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS backfill_jobs (
            job_id TEXT PRIMARY KEY,
            station_id TEXT NOT NULL,
            status TEXT NOT NULL,
            payload TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn to_utc(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn measurement_from_row(row: &SqliteRow) -> Result<Measurement> {
    Ok(Measurement {
        station_id: row.try_get("station_id")?,
        station_name: row.try_get("station_name")?,
        measured_at_utc: to_utc(row.try_get("measured_at")?),
        temperature_c: row.try_get("temperature_c")?,
        pressure_hpa: row.try_get("pressure_hpa")?,
        speed_mps: row.try_get("speed_mps")?,
        direction_deg: row.try_get("direction_deg")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        altitude_m: row.try_get("altitude_m")?,
    })
}

const MEASUREMENT_COLUMNS: &str = "station_id, measured_at, station_name, temperature_c, pressure_hpa, \
     speed_mps, direction_deg, latitude, longitude, altitude_m";

#[async_trait]
impl MeasurementStore for SqliteStore {
    async fn has_cached_window(&self, station_id: &str, window: &TimeWindow) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM fetch_windows WHERE station_id = ? AND start_utc = ? AND end_utc = ?")
            .bind(station_id)
            .bind(window.start_utc.timestamp())
            .bind(window.end_utc.timestamp())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn has_fresh_window(
        &self,
        station_id: &str,
        window: &TimeWindow,
        min_fetched_at: DateTime<Utc>,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM fetch_windows WHERE station_id = ? AND start_utc = ? AND end_utc = ? AND fetched_at >= ?",
        )
        .bind(station_id)
        .bind(window.start_utc.timestamp())
        .bind(window.end_utc.timestamp())
        .bind(min_fetched_at.timestamp())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn is_direction_checked(&self, station_id: &str, window: &TimeWindow) -> Result<bool> {
        let checked: Option<i64> = sqlx::query_scalar(
            "SELECT direction_checked FROM fetch_windows WHERE station_id = ? AND start_utc = ? AND end_utc = ?",
        )
        .bind(station_id)
        .bind(window.start_utc.timestamp())
        .bind(window.end_utc.timestamp())
        .fetch_optional(&self.pool)
        .await?;
        Ok(checked.unwrap_or(0) != 0)
    }

    async fn mark_direction_checked(&self, station_id: &str, window: &TimeWindow) -> Result<()> {
        sqlx::query(
            "UPDATE fetch_windows SET direction_checked = 1 WHERE station_id = ? AND start_utc = ? AND end_utc = ?",
        )
        .bind(station_id)
        .bind(window.start_utc.timestamp())
        .bind(window.end_utc.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_measurements(
        &self,
        station_id: &str,
        rows: &[Measurement],
        window: &TimeWindow,
        fetched_at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO measurements (station_id, measured_at, station_name, temperature_c, pressure_hpa,
                                          speed_mps, direction_deg, latitude, longitude, altitude_m)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (station_id, measured_at) DO UPDATE SET
                    station_name = CASE WHEN excluded.station_name = '' THEN measurements.station_name
                                        ELSE excluded.station_name END,
                    temperature_c = excluded.temperature_c,
                    pressure_hpa = excluded.pressure_hpa,
                    speed_mps = excluded.speed_mps,
                    direction_deg = excluded.direction_deg,
                    latitude = COALESCE(excluded.latitude, measurements.latitude),
                    longitude = COALESCE(excluded.longitude, measurements.longitude),
                    altitude_m = COALESCE(excluded.altitude_m, measurements.altitude_m)
                "#,
            )
            .bind(station_id)
            .bind(row.measured_at_utc.timestamp())
            .bind(&row.station_name)
            .bind(row.temperature_c)
            .bind(row.pressure_hpa)
            .bind(row.speed_mps)
            .bind(row.direction_deg)
            .bind(row.latitude)
            .bind(row.longitude)
            .bind(row.altitude_m)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO fetch_windows (station_id, start_utc, end_utc, fetched_at, direction_checked)
            VALUES (?, ?, ?, ?, 1)
            ON CONFLICT (station_id, start_utc, end_utc) DO UPDATE SET
                fetched_at = excluded.fetched_at,
                direction_checked = 1
            "#,
        )
        .bind(station_id)
        .bind(window.start_utc.timestamp())
        .bind(window.end_utc.timestamp())
        .bind(fetched_at.timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(rows.len())
    }

    async fn get_measurements(
        &self,
        station_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Measurement>> {
        let rows = sqlx::query(&format!(
            "SELECT {MEASUREMENT_COLUMNS} FROM measurements \
             WHERE station_id = ? AND measured_at >= ? AND measured_at < ? ORDER BY measured_at ASC"
        ))
        .bind(station_id)
        .bind(start.timestamp())
        .bind(end.timestamp())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(measurement_from_row).collect()
    }

    async fn get_latest_timestamp(&self, station_id: &str) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(measured_at) FROM measurements WHERE station_id = ?")
                .bind(station_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(latest.map(to_utc))
    }

    async fn get_latest_measurement(&self, station_id: &str) -> Result<Option<Measurement>> {
        let row = sqlx::query(&format!(
            "SELECT {MEASUREMENT_COLUMNS} FROM measurements WHERE station_id = ? ORDER BY measured_at DESC LIMIT 1"
        ))
        .bind(station_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(measurement_from_row).transpose()
    }

    async fn fetch_windows(&self, station_id: &str) -> Result<Vec<FetchWindowRecord>> {
        let rows = sqlx::query(
            "SELECT station_id, start_utc, end_utc, fetched_at, direction_checked FROM fetch_windows \
             WHERE station_id = ? ORDER BY start_utc ASC",
        )
        .bind(station_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<FetchWindowRecord> {
                Ok(FetchWindowRecord {
                    station_id: row.try_get("station_id")?,
                    start_utc: to_utc(row.try_get("start_utc")?),
                    end_utc: to_utc(row.try_get("end_utc")?),
                    fetched_at_utc: to_utc(row.try_get("fetched_at")?),
                    direction_checked: row.try_get::<i64, _>("direction_checked")? != 0,
                })
            })
            .collect()
    }

    async fn upsert_job(&self, job: &BackfillJob) -> Result<()> {
        let payload = serde_json::to_string(job).context("failed to serialize backfill job")?;
        sqlx::query(
            r#"
            INSERT INTO backfill_jobs (job_id, station_id, status, payload, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (job_id) DO UPDATE SET
                status = excluded.status,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.station_id)
        .bind(job.status.to_string())
        .bind(payload)
        .bind(job.updated_at_utc.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<BackfillJob>> {
        let payload: Option<String> = sqlx::query_scalar("SELECT payload FROM backfill_jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        payload
            .map(|p| serde_json::from_str(&p).context("corrupt backfill job payload"))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, m, d, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_window_lifecycle() {
        let store = SqliteStore::open_memory().await.unwrap();
        let window = TimeWindow::month_of(t(1, 1));
        assert!(!store.has_cached_window("89064", &window).await.unwrap());

        let rows = vec![Measurement::new("89064", t(1, 2)).with_wind(5.0, Some(270.0))];
        store.upsert_measurements("89064", &rows, &window, t(2, 1)).await.unwrap();

        assert!(store.has_cached_window("89064", &window).await.unwrap());
        assert!(store.is_direction_checked("89064", &window).await.unwrap());
        assert!(!store.has_fresh_window("89064", &window, t(2, 2)).await.unwrap());
        assert_eq!(store.get_latest_timestamp("89064").await.unwrap(), Some(t(1, 2)));
        assert_eq!(store.fetch_windows("89064").await.unwrap().len(), 1);

        let fetched = store.get_measurements("89064", t(1, 1), t(2, 1)).await.unwrap();
        assert_eq!(fetched, rows);
    }

    #[tokio::test]
    async fn test_coordinates_are_coalesced() {
        let store = SqliteStore::open_memory().await.unwrap();
        let window = TimeWindow::month_of(t(1, 1));
        let mut first = Measurement::new("89064", t(1, 3));
        first.altitude_m = Some(12.0);
        store.upsert_measurements("89064", &[first], &window, t(2, 1)).await.unwrap();
        store
            .upsert_measurements("89064", &[Measurement::new("89064", t(1, 3))], &window, t(2, 1))
            .await
            .unwrap();

        let latest = store.get_latest_measurement("89064").await.unwrap().unwrap();
        assert_eq!(latest.altitude_m, Some(12.0));
    }
}
