//! Persistent cache of measurements, fetch windows and backfill jobs.

pub mod memory;
#[cfg(feature = "db")]
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::domain::{BackfillJob, Measurement, TimeWindow};

pub use memory::InMemoryStore;

/// "This window has been retrieved from upstream as of `fetched_at_utc`."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchWindowRecord {
    pub station_id: String,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub fetched_at_utc: DateTime<Utc>,
    pub direction_checked: bool,
}

impl FetchWindowRecord {
    pub fn window(&self) -> TimeWindow {
        TimeWindow { start_utc: self.start_utc, end_utc: self.end_utc }
    }
}

/// Store contract shared by the retrieval path and job workers.
///
/// Implementations must be safe under concurrent callers.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    async fn has_cached_window(&self, station_id: &str, window: &TimeWindow) -> Result<bool>;

    async fn has_fresh_window(
        &self,
        station_id: &str,
        window: &TimeWindow,
        min_fetched_at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn is_direction_checked(&self, station_id: &str, window: &TimeWindow) -> Result<bool>;

    async fn mark_direction_checked(&self, station_id: &str, window: &TimeWindow) -> Result<()>;

    /// Upsert rows and write the window's fetch record with `fetched_at`.
    async fn upsert_measurements(
        &self,
        station_id: &str,
        rows: &[Measurement],
        window: &TimeWindow,
        fetched_at: DateTime<Utc>,
    ) -> Result<usize>;

    /// Rows in `[start, end)` ordered by time.
    async fn get_measurements(
        &self,
        station_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Measurement>>;

    async fn get_latest_timestamp(&self, station_id: &str) -> Result<Option<DateTime<Utc>>>;

    async fn get_latest_measurement(&self, station_id: &str) -> Result<Option<Measurement>>;

    async fn fetch_windows(&self, station_id: &str) -> Result<Vec<FetchWindowRecord>>;

    async fn upsert_job(&self, job: &BackfillJob) -> Result<()>;

    async fn get_job(&self, job_id: &str) -> Result<Option<BackfillJob>>;
}

/// Store selected by build features and configuration.
pub async fn open_store(cfg: &Config) -> Result<Arc<dyn MeasurementStore>> {
    #[cfg(feature = "db")]
    {
        let store = sqlite::SqliteStore::connect(&cfg.db.url).await?;
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "db"))]
    {
        tracing::warn!(url = %cfg.db.url, "built without the `db` feature; using the in-memory store");
        Ok(Arc::new(InMemoryStore::new()))
    }
}
