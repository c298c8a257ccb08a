use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{FetchWindowRecord, MeasurementStore};
use crate::domain::{BackfillJob, Measurement, TimeWindow};

type WindowKey = (String, DateTime<Utc>, DateTime<Utc>);

#[derive(Default)]
struct State {
    measurements: HashMap<String, BTreeMap<DateTime<Utc>, Measurement>>,
    windows: HashMap<WindowKey, FetchWindowRecord>,
    jobs: HashMap<String, BackfillJob>,
}

/// Process-local store. Used by tests and by builds without the `db` feature.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert rows without touching fetch records.
    pub async fn seed_measurements(&self, rows: &[Measurement]) {
        let mut state = self.state.write().await;
        for row in rows {
            merge_row(&mut state, row.clone());
        }
    }

    /// Insert a fetch record as-is, e.g. one imported from an older cache
    /// whose direction scan never ran.
    pub async fn seed_window(&self, record: FetchWindowRecord) {
        let window = record.window();
        self.state.write().await.windows.insert(key(&record.station_id, &window), record);
    }
}

fn key(station_id: &str, window: &TimeWindow) -> WindowKey {
    (station_id.to_string(), window.start_utc, window.end_utc)
}

fn merge_row(state: &mut State, mut row: Measurement) {
    let series = state.measurements.entry(row.station_id.clone()).or_default();
    if let Some(previous) = series.get(&row.measured_at_utc) {
        row.latitude = row.latitude.or(previous.latitude);
        row.longitude = row.longitude.or(previous.longitude);
        row.altitude_m = row.altitude_m.or(previous.altitude_m);
        if row.station_name.is_empty() {
            row.station_name = previous.station_name.clone();
        }
    }
    series.insert(row.measured_at_utc, row);
}

#[async_trait]
impl MeasurementStore for InMemoryStore {
    async fn has_cached_window(&self, station_id: &str, window: &TimeWindow) -> Result<bool> {
        Ok(self.state.read().await.windows.contains_key(&key(station_id, window)))
    }

    async fn has_fresh_window(
        &self,
        station_id: &str,
        window: &TimeWindow,
        min_fetched_at: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .state
            .read()
            .await
            .windows
            .get(&key(station_id, window))
            .map(|r| r.fetched_at_utc >= min_fetched_at)
            .unwrap_or(false))
    }

    async fn is_direction_checked(&self, station_id: &str, window: &TimeWindow) -> Result<bool> {
        Ok(self
            .state
            .read()
            .await
            .windows
            .get(&key(station_id, window))
            .map(|r| r.direction_checked)
            .unwrap_or(false))
    }

    async fn mark_direction_checked(&self, station_id: &str, window: &TimeWindow) -> Result<()> {
        if let Some(record) = self.state.write().await.windows.get_mut(&key(station_id, window)) {
            record.direction_checked = true;
        }
        Ok(())
    }

    async fn upsert_measurements(
        &self,
        station_id: &str,
        rows: &[Measurement],
        window: &TimeWindow,
        fetched_at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut state = self.state.write().await;
        for row in rows {
            let mut row = row.clone();
            row.station_id = station_id.to_string();
            merge_row(&mut state, row);
        }
        state.windows.insert(
            key(station_id, window),
            FetchWindowRecord {
                station_id: station_id.to_string(),
                start_utc: window.start_utc,
                end_utc: window.end_utc,
                fetched_at_utc: fetched_at,
                direction_checked: true,
            },
        );
        Ok(rows.len())
    }

    async fn get_measurements(
        &self,
        station_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Measurement>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let state = self.state.read().await;
        Ok(state
            .measurements
            .get(station_id)
            .map(|series| series.range(start..end).map(|(_, m)| m.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_latest_timestamp(&self, station_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .state
            .read()
            .await
            .measurements
            .get(station_id)
            .and_then(|series| series.keys().next_back().copied()))
    }

    async fn get_latest_measurement(&self, station_id: &str) -> Result<Option<Measurement>> {
        Ok(self
            .state
            .read()
            .await
            .measurements
            .get(station_id)
            .and_then(|series| series.values().next_back().cloned()))
    }

    async fn fetch_windows(&self, station_id: &str) -> Result<Vec<FetchWindowRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<FetchWindowRecord> = state
            .windows
            .values()
            .filter(|r| r.station_id == station_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.start_utc);
        Ok(records)
    }

    async fn upsert_job(&self, job: &BackfillJob) -> Result<()> {
        self.state.write().await.jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<BackfillJob>> {
        Ok(self.state.read().await.jobs.get(job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap()
    }

    fn january() -> TimeWindow {
        TimeWindow::month_of(t(1, 0))
    }

    #[tokio::test]
    async fn test_upsert_records_window_and_rows() {
        let store = InMemoryStore::new();
        let rows = vec![Measurement::new("89064", t(2, 0)).with_wind(4.0, Some(90.0))];
        store.upsert_measurements("89064", &rows, &january(), t(20, 0)).await.unwrap();

        assert!(store.has_cached_window("89064", &january()).await.unwrap());
        assert!(store.is_direction_checked("89064", &january()).await.unwrap());
        assert!(store.has_fresh_window("89064", &january(), t(19, 0)).await.unwrap());
        assert!(!store.has_fresh_window("89064", &january(), t(21, 0)).await.unwrap());
        assert_eq!(store.get_latest_timestamp("89064").await.unwrap(), Some(t(2, 0)));
    }

    #[tokio::test]
    async fn test_empty_upsert_is_still_cached() {
        let store = InMemoryStore::new();
        store.upsert_measurements("89070", &[], &january(), t(20, 0)).await.unwrap();
        assert!(store.has_cached_window("89070", &january()).await.unwrap());
        assert_eq!(store.fetch_windows("89070").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_keeps_previous_coordinates() {
        let store = InMemoryStore::new();
        let mut first = Measurement::new("89064", t(2, 0));
        first.latitude = Some(-62.6);
        store.upsert_measurements("89064", &[first], &january(), t(20, 0)).await.unwrap();

        let refreshed = Measurement::new("89064", t(2, 0)).with_wind(8.0, None);
        store.upsert_measurements("89064", &[refreshed], &january(), t(21, 0)).await.unwrap();

        let rows = store.get_measurements("89064", t(1, 0), t(3, 0)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].latitude, Some(-62.6));
        assert_eq!(rows[0].speed_mps, Some(8.0));
    }

    #[tokio::test]
    async fn test_range_is_half_open() {
        let store = InMemoryStore::new();
        store
            .seed_measurements(&[Measurement::new("89064", t(2, 0)), Measurement::new("89064", t(3, 0))])
            .await;
        let rows = store.get_measurements("89064", t(2, 0), t(3, 0)).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
