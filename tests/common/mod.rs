#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use antarctic_wind_cache::backfill::RecordingSleeper;
use antarctic_wind_cache::clock::FixedClock;
use antarctic_wind_cache::domain::{Measurement, TimeWindow};
use antarctic_wind_cache::repo::{FetchWindowRecord, InMemoryStore, MeasurementStore};
use antarctic_wind_cache::upstream::{UpstreamError, WeatherSource};
use antarctic_wind_cache::{EngineSettings, WindEngine};

pub const STATION: &str = "89064";

pub fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

/// Hourly rows in `[start, end)` blowing from `direction` at `speed`.
pub fn hourly_rows(start: DateTime<Utc>, end: DateTime<Utc>, speed: f64, direction: Option<f64>) -> Vec<Measurement> {
    let mut rows = Vec::new();
    let mut at = start;
    while at < end {
        let mut row = Measurement::new(STATION, at).with_wind(speed, direction).with_air(-2.0, 990.0);
        row.station_name = "JCI".to_string();
        rows.push(row);
        at += Duration::hours(1);
    }
    rows
}

/// Upstream fake serving a fixed row pool.
///
/// Scripted failures are consumed in order, one per call, before the pool
/// answers.
#[derive(Default)]
pub struct ScriptedSource {
    pool: Mutex<Vec<Measurement>>,
    failures: Mutex<VecDeque<UpstreamError>>,
    calls: Mutex<Vec<TimeWindow>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Measurement>) -> Self {
        let source = Self::default();
        source.replace_rows(rows);
        source
    }

    pub fn replace_rows(&self, rows: Vec<Measurement>) {
        *self.pool.lock() = rows;
    }

    pub fn fail_next(&self, errors: impl IntoIterator<Item = UpstreamError>) {
        self.failures.lock().extend(errors);
    }

    pub fn calls(&self) -> Vec<TimeWindow> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl WeatherSource for ScriptedSource {
    async fn fetch(
        &self,
        station_id: &str,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
    ) -> Result<Vec<Measurement>, UpstreamError> {
        self.calls.lock().push(TimeWindow { start_utc, end_utc });
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self
            .pool
            .lock()
            .iter()
            .filter(|r| r.station_id == station_id && r.measured_at_utc >= start_utc && r.measured_at_utc < end_utc)
            .cloned()
            .collect())
    }
}

pub struct Harness {
    pub engine: WindEngine,
    pub store: Arc<InMemoryStore>,
    pub source: Arc<ScriptedSource>,
    pub clock: Arc<FixedClock>,
    pub sleeper: Arc<RecordingSleeper>,
}

impl Harness {
    pub fn new(source: ScriptedSource, background_enabled: bool) -> Self {
        let mut settings = EngineSettings::default();
        settings.jobs.background_enabled = background_enabled;

        let store = Arc::new(InMemoryStore::new());
        let source = Arc::new(source);
        let clock = Arc::new(FixedClock::new(utc(2024, 6, 1, 0)));
        let sleeper = Arc::new(RecordingSleeper::new());
        let engine = WindEngine::new(settings, store.clone(), source.clone(), clock.clone(), sleeper.clone());
        Self { engine, store, source, clock, sleeper }
    }

    /// Store `rows` and a fetch record for the month starting at `month_start`.
    pub async fn cache_month(&self, month_start: DateTime<Utc>, rows: &[Measurement]) {
        let window = TimeWindow::month_of(month_start);
        self.store
            .upsert_measurements(STATION, rows, &window, utc(2024, 5, 1, 0))
            .await
            .unwrap();
    }

    /// Cache a month the way an older build did: rows stored, direction
    /// never scanned.
    pub async fn cache_unchecked_month(&self, month_start: DateTime<Utc>, rows: &[Measurement]) {
        let window = TimeWindow::month_of(month_start);
        self.store.seed_measurements(rows).await;
        self.store
            .seed_window(FetchWindowRecord {
                station_id: STATION.to_string(),
                start_utc: window.start_utc,
                end_utc: window.end_utc,
                fetched_at_utc: utc(2024, 5, 1, 0),
                direction_checked: false,
            })
            .await;
    }
}
