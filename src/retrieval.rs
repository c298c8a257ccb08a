//! Cache-first retrieval over calendar-month windows.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::analytics::aggregate;
use crate::clock::Clock;
use crate::domain::window::{self, previous_month_start, start_of_month};
use crate::domain::{wants_direction, Measurement, MeasurementType, StationPolicy, TimeAggregation, TimeWindow};
use crate::error::WindResult;
use crate::repo::MeasurementStore;
use crate::upstream::WeatherSource;

const SUGGESTED_SPAN_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestAvailability {
    pub station_id: String,
    pub checked_at_utc: DateTime<Utc>,
    pub newest_observation_utc: Option<DateTime<Utc>>,
    pub suggested_start_utc: Option<DateTime<Utc>>,
    pub suggested_end_utc: Option<DateTime<Utc>>,
    pub suggested_aggregation: Option<TimeAggregation>,
    pub probe_window_hours: i64,
    pub note: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmCacheReport {
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl WarmCacheReport {
    fn merge(mut self, other: Self) -> Self {
        self.fetched += other.fetched;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self
    }
}

pub struct RetrievalCoordinator {
    store: Arc<dyn MeasurementStore>,
    source: Arc<dyn WeatherSource>,
    clock: Arc<dyn Clock>,
    stations: StationPolicy,
    tz: Tz,
    lookback_days: i64,
}

impl RetrievalCoordinator {
    pub fn new(
        store: Arc<dyn MeasurementStore>,
        source: Arc<dyn WeatherSource>,
        clock: Arc<dyn Clock>,
        tz: Tz,
        lookback_days: i64,
    ) -> Self {
        Self { store, source, clock, stations: StationPolicy, tz, lookback_days }
    }

    pub fn store(&self) -> &Arc<dyn MeasurementStore> {
        &self.store
    }

    pub fn source(&self) -> &Arc<dyn WeatherSource> {
        &self.source
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Rows for `[start, end)`, fetching only the month windows not yet cached.
    pub async fn get_data(
        &self,
        station: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        aggregation: TimeAggregation,
        selected: &[MeasurementType],
    ) -> WindResult<Vec<Measurement>> {
        let station_id = self.stations.resolve(station)?;
        for window in window::split(start, end)? {
            self.ensure_window(&station_id, &window, selected).await?;
        }
        let rows = self.store.get_measurements(&station_id, start, end).await?;
        Ok(aggregate(rows, aggregation, self.tz)
            .into_iter()
            .map(|row| row.project(selected))
            .collect())
    }

    /// Re-fetch every window of `[start, end)` regardless of cache state.
    pub async fn refresh_data_range(&self, station: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> WindResult<usize> {
        let station_id = self.stations.resolve(station)?;
        let mut stored = 0;
        for window in window::split(start, end)? {
            stored += self.fetch_and_store(&station_id, &window).await?.len();
        }
        info!(station = %station_id, %start, %end, rows = stored, "refreshed range from upstream");
        Ok(stored)
    }

    async fn ensure_window(&self, station_id: &str, window: &TimeWindow, selected: &[MeasurementType]) -> WindResult<()> {
        if self.store.has_cached_window(station_id, window).await? {
            if self.needs_direction_recovery(station_id, window, selected).await? {
                info!(station = %station_id, %window, "cached window lacks direction; re-fetching once");
                self.fetch_and_store(station_id, window).await?;
            }
            return Ok(());
        }
        debug!(station = %station_id, %window, "cache miss");
        self.fetch_and_store(station_id, window).await?;
        Ok(())
    }

    /// Windows cached before direction was parsed have speed but no bearing.
    /// Anything else is trusted and marked checked so the scan happens once.
    async fn needs_direction_recovery(
        &self,
        station_id: &str,
        window: &TimeWindow,
        selected: &[MeasurementType],
    ) -> WindResult<bool> {
        if !wants_direction(selected)
            || !self.stations.is_selectable(station_id)
            || self.store.is_direction_checked(station_id, window).await?
        {
            return Ok(false);
        }
        let rows = self.store.get_measurements(station_id, window.start_utc, window.end_utc).await?;
        let stale = {
            let mut with_speed = rows.iter().filter(|r| r.speed_mps.is_some()).peekable();
            with_speed.peek().is_some() && !with_speed.any(|r| r.direction_deg.is_some())
        };
        if !stale {
            self.store.mark_direction_checked(station_id, window).await?;
        }
        Ok(stale)
    }

    async fn fetch_and_store(&self, station_id: &str, window: &TimeWindow) -> WindResult<Vec<Measurement>> {
        let rows = self.source.fetch(station_id, window.start_utc, window.end_utc).await?;
        self.store
            .upsert_measurements(station_id, &rows, window, self.clock.now())
            .await?;
        debug!(station = %station_id, %window, rows = rows.len(), "stored upstream window");
        Ok(rows)
    }

    /// Newest observation and a suggested query window around it.
    pub async fn get_latest_availability(&self, station: &str) -> WindResult<LatestAvailability> {
        let station_id = self.stations.resolve(station)?;
        let now = self.clock.now();
        let mut latest = LatestAvailability {
            station_id: station_id.clone(),
            checked_at_utc: now,
            newest_observation_utc: None,
            suggested_start_utc: None,
            suggested_end_utc: None,
            suggested_aggregation: None,
            probe_window_hours: 0,
            note: String::new(),
        };

        if let Some(newest) = self.store.get_latest_timestamp(&station_id).await? {
            let start = newest - Duration::hours(SUGGESTED_SPAN_HOURS);
            latest.newest_observation_utc = Some(newest);
            latest.suggested_start_utc = Some(start);
            latest.suggested_end_utc = Some(newest);
            latest.suggested_aggregation = Some(suggested_aggregation(start, newest));
            latest.note = "Suggested window derived from cached observations.".to_string();
            return Ok(latest);
        }

        let floor = start_of_month(now - Duration::days(self.lookback_days));
        let mut month_start = start_of_month(now);
        while month_start >= floor {
            let window = TimeWindow::month_of(month_start);
            let (rows, origin) = if self.store.has_cached_window(&station_id, &window).await? {
                let rows = self
                    .store
                    .get_measurements(&station_id, window.start_utc, window.end_utc)
                    .await?;
                (rows, "cached observations")
            } else {
                (self.fetch_and_store(&station_id, &window).await?, "upstream backscan")
            };

            if let Some(newest) = rows.iter().map(|r| r.measured_at_utc).max() {
                let start = window.start_utc.max(newest - Duration::hours(SUGGESTED_SPAN_HOURS));
                latest.newest_observation_utc = Some(newest);
                latest.suggested_start_utc = Some(start);
                latest.suggested_end_utc = Some(newest);
                latest.suggested_aggregation = Some(suggested_aggregation(start, newest));
                latest.probe_window_hours = ((now - window.start_utc).num_seconds() as f64 / 3600.0).round() as i64;
                latest.note = format!("Suggested window targets latest available observations from {origin}.");
                info!(station = %station_id, %newest, origin, "located latest observation");
                return Ok(latest);
            }
            month_start = previous_month_start(month_start);
        }

        latest.note = format!(
            "No observations were found in the last {} days for this station.",
            self.lookback_days
        );
        Ok(latest)
    }

    /// Fetch every uncached month window of the last `hours` for `stations`.
    /// Failures are logged and counted, never returned.
    pub async fn warm_cache(&self, stations: &[String], hours: i64) -> WarmCacheReport {
        let now = self.clock.now();
        let windows = match window::split(now - Duration::hours(hours), now) {
            Ok(windows) => windows,
            Err(err) => {
                warn!(error = %err, "warm cache skipped");
                return WarmCacheReport::default();
            }
        };

        let reports = join_all(stations.iter().map(|station_id| {
            let windows = &windows;
            async move {
                let mut report = WarmCacheReport::default();
                for window in windows {
                    match self.warm_window(station_id, window).await {
                        Ok(true) => report.fetched += 1,
                        Ok(false) => report.skipped += 1,
                        Err(err) => {
                            warn!(station = %station_id, %window, error = %err, "warm cache fetch failed");
                            report.failed += 1;
                        }
                    }
                }
                report
            }
        }))
        .await;

        let total = reports.into_iter().fold(WarmCacheReport::default(), WarmCacheReport::merge);
        debug!(fetched = total.fetched, skipped = total.skipped, failed = total.failed, "warm cache pass");
        total
    }

    async fn warm_window(&self, station_id: &str, window: &TimeWindow) -> WindResult<bool> {
        if self.store.has_cached_window(station_id, window).await? {
            return Ok(false);
        }
        self.fetch_and_store(station_id, window).await?;
        Ok(true)
    }

    /// Station id after alias resolution, for callers that bypass `get_data`.
    pub fn resolve_station(&self, station: &str) -> WindResult<String> {
        self.stations.resolve(station)
    }
}

fn suggested_aggregation(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeAggregation {
    if end - start <= Duration::days(2) {
        TimeAggregation::None
    } else {
        TimeAggregation::Hourly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::WindError;
    use crate::repo::InMemoryStore;
    use crate::upstream::{MockWeatherSource, UpstreamError};
    use chrono::TimeZone;
    use mockall::predicate::eq;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn coordinator(store: Arc<InMemoryStore>, source: MockWeatherSource, now: DateTime<Utc>) -> RetrievalCoordinator {
        RetrievalCoordinator::new(store, Arc::new(source), Arc::new(FixedClock::new(now)), chrono_tz::UTC, 720)
    }

    #[tokio::test]
    async fn test_cached_window_is_not_refetched() {
        let store = Arc::new(InMemoryStore::new());
        let january = TimeWindow::month_of(utc(2024, 1, 1));
        let row = Measurement::new("89064", utc(2024, 1, 5)).with_wind(7.0, Some(200.0));
        store.upsert_measurements("89064", &[row], &january, utc(2024, 2, 1)).await.unwrap();

        let mut source = MockWeatherSource::new();
        source.expect_fetch().never();
        let retrieval = coordinator(store, source, utc(2024, 6, 1));

        let rows = retrieval
            .get_data("juan-carlos-i", utc(2024, 1, 1), utc(2024, 1, 31), TimeAggregation::None, &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].direction_deg, Some(200.0));
    }

    #[tokio::test]
    async fn test_invalid_range_is_rejected_before_fetch() {
        let mut source = MockWeatherSource::new();
        source.expect_fetch().never();
        let retrieval = coordinator(Arc::new(InMemoryStore::new()), source, utc(2024, 6, 1));

        let err = retrieval
            .get_data("89064", utc(2024, 2, 1), utc(2024, 1, 1), TimeAggregation::None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, WindError::InvalidRange { .. }));
    }

    #[tokio::test]
    async fn test_unknown_station_is_validation_error() {
        let retrieval = coordinator(Arc::new(InMemoryStore::new()), MockWeatherSource::new(), utc(2024, 6, 1));
        let err = retrieval
            .get_data("99999", utc(2024, 1, 1), utc(2024, 1, 2), TimeAggregation::None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, WindError::Validation(_)));
    }

    #[tokio::test]
    async fn test_upstream_error_propagates_unmodified() {
        let mut source = MockWeatherSource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(|_, _, _| Err(UpstreamError::Transient { status: 503 }));
        let retrieval = coordinator(Arc::new(InMemoryStore::new()), source, utc(2024, 6, 1));

        let err = retrieval
            .get_data("89064", utc(2024, 1, 1), utc(2024, 1, 2), TimeAggregation::None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, WindError::Upstream(UpstreamError::Transient { status: 503 })));
    }

    #[tokio::test]
    async fn test_latest_prefers_cached_newest() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_measurements(&[Measurement::new("89070", utc(2024, 5, 20))]).await;
        let mut source = MockWeatherSource::new();
        source.expect_fetch().never();
        let retrieval = coordinator(store, source, utc(2024, 6, 1));

        let latest = retrieval.get_latest_availability("89070").await.unwrap();
        assert_eq!(latest.newest_observation_utc, Some(utc(2024, 5, 20)));
        assert_eq!(latest.suggested_start_utc, Some(utc(2024, 5, 19)));
        assert_eq!(latest.suggested_aggregation, Some(TimeAggregation::None));
        assert_eq!(latest.probe_window_hours, 0);
    }

    #[tokio::test]
    async fn test_latest_backscans_until_rows_appear() {
        let mut source = MockWeatherSource::new();
        source
            .expect_fetch()
            .with(eq("89064"), eq(utc(2024, 6, 1)), eq(utc(2024, 7, 1)))
            .times(1)
            .returning(|_, _, _| Ok(vec![]));
        source
            .expect_fetch()
            .with(eq("89064"), eq(utc(2024, 5, 1)), eq(utc(2024, 6, 1)))
            .times(1)
            .returning(|_, _, _| Ok(vec![Measurement::new("89064", Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap())]));
        let retrieval = coordinator(Arc::new(InMemoryStore::new()), source, utc(2024, 6, 10));

        let latest = retrieval.get_latest_availability("89064").await.unwrap();
        // Clipped to the month start.
        assert_eq!(latest.suggested_start_utc, Some(utc(2024, 5, 1)));
        assert_eq!(latest.probe_window_hours, 40 * 24);
        assert!(latest.note.contains("upstream backscan"));
    }

    #[tokio::test]
    async fn test_warm_cache_swallows_failures() {
        let mut source = MockWeatherSource::new();
        source
            .expect_fetch()
            .with(eq("89064"), mockall::predicate::always(), mockall::predicate::always())
            .returning(|_, _, _| Ok(vec![]));
        source
            .expect_fetch()
            .with(eq("89070"), mockall::predicate::always(), mockall::predicate::always())
            .returning(|_, _, _| Err(UpstreamError::Permanent("HTTP 401".into())));
        let retrieval = coordinator(Arc::new(InMemoryStore::new()), source, utc(2024, 6, 10));

        let report = retrieval.warm_cache(&["89064".to_string(), "89070".to_string()], 720).await;
        assert_eq!(report, WarmCacheReport { fetched: 2, skipped: 0, failed: 2 });

        let second = retrieval.warm_cache(&["89064".to_string()], 720).await;
        assert_eq!(second.skipped, 2);
    }
}
