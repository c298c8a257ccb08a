//! The service facade: one engine owning retrieval, jobs and analytics.

use anyhow::Result;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::analytics::playback::{self, QualityCounts};
use crate::analytics::summary::{build_summary, FeasibilitySummary, SummaryContext};
use crate::analytics::timeframes::{comparison_deltas, group_buckets, ComparisonDelta, TimeframeBucket, TimeframeGroupBy};
use crate::analytics::wind_rose::{build_wind_rose, WindRoseSummary};
use crate::analytics::{PlaybackFrame, WindFarmParams};
use crate::backfill::{
    BackfillOrchestrator, BackfillWorker, CreateJobRequest, JobStatusView, RetryPolicy, Sleeper, WorkerRegistry,
};
use crate::clock::Clock;
use crate::config::{CacheConfig, Config, JobsConfig};
use crate::domain::{
    JobStatus, Measurement, MeasurementType, PlaybackStep, StationPolicy, StationProfile, StationRole,
    TimeAggregation, TimeWindow,
};
use crate::error::{WindError, WindResult};
use crate::repo::MeasurementStore;
use crate::retrieval::{LatestAvailability, RetrievalCoordinator, WarmCacheReport};
use crate::upstream::WeatherSource;

const SUGGESTED_HISTORY_DAYS: i64 = 730;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub timezone: Tz,
    pub max_playback_frames: usize,
    pub min_request_interval: std::time::Duration,
    pub jobs: JobsConfig,
    pub cache: CacheConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::Madrid,
            max_playback_frames: 1500,
            min_request_interval: std::time::Duration::from_secs(2),
            jobs: JobsConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self {
            timezone: cfg.analytics.timezone()?,
            max_playback_frames: cfg.analytics.max_playback_frames,
            min_request_interval: cfg.upstream.min_request_interval(),
            jobs: cfg.jobs.clone(),
            cache: cfg.cache.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationSnapshot {
    pub checked_at_utc: DateTime<Utc>,
    pub station_id: String,
    pub station_name: String,
    pub role: Option<StationRole>,
    pub requested_start_utc: DateTime<Utc>,
    pub effective_end_utc: DateTime<Utc>,
    pub effective_end_reason: String,
    pub timezone: String,
    pub aggregation: TimeAggregation,
    pub selected_types: Vec<MeasurementType>,
    pub notes: Vec<String>,
    pub summary: FeasibilitySummary,
    pub data: Vec<Measurement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackResponse {
    pub station_id: String,
    pub station_name: String,
    pub requested_step: PlaybackStep,
    pub effective_step: PlaybackStep,
    pub timezone: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub frames_planned: usize,
    pub frames_ready: usize,
    pub quality_counts: QualityCounts,
    pub wind_rose: WindRoseSummary,
    pub frames: Vec<PlaybackFrame>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeframeRequest {
    pub station: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub group_by: TimeframeGroupBy,
    #[serde(default = "default_request_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub compare_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub compare_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub simulation: Option<WindFarmParams>,
    #[serde(default)]
    pub force_refresh_on_empty: bool,
}

fn default_request_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeframeAnalytics {
    pub station_id: String,
    pub station_name: String,
    pub group_by: TimeframeGroupBy,
    pub timezone: String,
    pub requested_start_utc: DateTime<Utc>,
    pub requested_end_utc: DateTime<Utc>,
    pub data_points: usize,
    pub buckets: Vec<TimeframeBucket>,
    pub wind_rose: WindRoseSummary,
    pub comparison: Vec<ComparisonDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    pub checked_at_utc: DateTime<Utc>,
    pub stations: Vec<StationProfile>,
    pub selectable_station_ids: Vec<String>,
    pub map_station_ids: Vec<String>,
    pub latest_observation_by_station: BTreeMap<String, Option<DateTime<Utc>>>,
    pub suggested_start_by_station: BTreeMap<String, Option<DateTime<Utc>>>,
    pub latest_snapshots: Vec<Measurement>,
    pub warm_cache: WarmCacheReport,
}

/// Parse an IANA zone name.
pub fn resolve_timezone(name: &str) -> WindResult<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| WindError::validation(format!("Unknown time zone '{name}'.")))
}

pub struct WindEngine {
    stations: StationPolicy,
    retrieval: Arc<RetrievalCoordinator>,
    jobs: BackfillOrchestrator,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl WindEngine {
    pub fn new(
        settings: EngineSettings,
        store: Arc<dyn MeasurementStore>,
        source: Arc<dyn WeatherSource>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let retrieval = Arc::new(RetrievalCoordinator::new(
            store.clone(),
            source.clone(),
            clock.clone(),
            settings.timezone,
            settings.cache.latest_lookback_days,
        ));
        let policy = RetryPolicy::new(settings.jobs.max_attempts, settings.min_request_interval);
        let worker = BackfillWorker::new(store, source, clock.clone(), sleeper, policy);
        let jobs = BackfillOrchestrator::new(
            retrieval.clone(),
            worker,
            Arc::new(WorkerRegistry::new()),
            clock.clone(),
            settings.jobs.clone(),
            &settings.cache,
        );
        Self { stations: StationPolicy, retrieval, jobs, clock, settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        self.jobs.registry()
    }

    pub fn station_profiles(&self) -> &'static [StationProfile] {
        self.stations.profiles()
    }

    pub async fn get_data(
        &self,
        station: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        aggregation: TimeAggregation,
        selected: &[MeasurementType],
    ) -> WindResult<Vec<Measurement>> {
        self.retrieval.get_data(station, start, end, aggregation, selected).await
    }

    pub async fn get_latest_availability(&self, station: &str) -> WindResult<LatestAvailability> {
        self.retrieval.get_latest_availability(station).await
    }

    pub async fn refresh_data_range(&self, station: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> WindResult<usize> {
        self.retrieval.refresh_data_range(station, start, end).await
    }

    pub async fn create_backfill_job(&self, request: CreateJobRequest) -> WindResult<JobStatusView> {
        resolve_timezone(&request.timezone)?;
        self.jobs.create_job(request).await
    }

    pub async fn get_job_status(&self, job_id: &str) -> WindResult<JobStatusView> {
        self.jobs.get_job_status(job_id).await
    }

    /// Snapshot over whatever part of the job's range is already cached.
    pub async fn get_job_result(&self, job_id: &str) -> WindResult<StationSnapshot> {
        let job = self.jobs.load(job_id).await?;
        let start = job.oldest_available_start().unwrap_or(job.requested_start_utc);
        let mut snapshot = self
            .get_station_snapshot(
                &job.station_id,
                start,
                Some(job.effective_end_utc),
                job.aggregation,
                &job.selected_types,
                &job.timezone,
            )
            .await?;
        if job.status != JobStatus::Complete {
            snapshot.notes.push(
                "Some historical windows are still loading. Values shown are based on currently cached observations."
                    .to_string(),
            );
        }
        Ok(snapshot)
    }

    pub async fn get_station_snapshot(
        &self,
        station: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        aggregation: TimeAggregation,
        selected: &[MeasurementType],
        timezone: &str,
    ) -> WindResult<StationSnapshot> {
        resolve_timezone(timezone)?;
        let station_id = self.stations.resolve_selectable(station)?;
        let latest = self.retrieval.get_latest_availability(&station_id).await?;
        let newest = latest.newest_observation_utc.ok_or_else(|| {
            WindError::validation(format!("No recent observations are available for station '{station_id}'."))
        })?;
        let effective_end = end.map_or(newest, |e| e.min(newest));
        TimeWindow::new(start, effective_end)?;

        let rows = self
            .retrieval
            .get_data(&station_id, start, effective_end, aggregation, selected)
            .await?;
        let profile = self.stations.profile(&station_id);
        let station_name = self.stations.display_name(&station_id);
        let summary = build_summary(
            &rows,
            &SummaryContext {
                station_id: &station_id,
                station_name: &station_name,
                role: profile.map(|p| p.role),
                aggregation,
                coverage_start: start,
                coverage_end: effective_end,
                latest_observation: Some(newest),
                tz: self.settings.timezone,
            },
        );

        Ok(StationSnapshot {
            checked_at_utc: self.clock.now(),
            station_id,
            station_name,
            role: profile.map(|p| p.role),
            requested_start_utc: start,
            effective_end_utc: effective_end,
            effective_end_reason: "limited_by_station_constraints".to_string(),
            timezone: timezone.to_string(),
            aggregation,
            selected_types: selected.to_vec(),
            notes: vec![
                "Single-station snapshot generated from cache-first retrieval strategy.".to_string(),
                "Data retrieval is chunked into full calendar-month upstream windows, but the analysis window can span multiple months/years.".to_string(),
                "Window end is capped by latest available station observation.".to_string(),
            ],
            summary,
            data: rows,
        })
    }

    pub async fn get_playback_frames(
        &self,
        station: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: PlaybackStep,
        timezone: &str,
    ) -> WindResult<PlaybackResponse> {
        let output_tz = resolve_timezone(timezone)?;
        let station_id = self.stations.resolve_selectable(station)?;
        TimeWindow::new(start, end)?;

        let effective = playback::coerce_step(start, end, step, self.settings.max_playback_frames);
        let mut rows = self
            .retrieval
            .get_data(&station_id, start, end, playback::source_aggregation(effective), &[])
            .await?;
        if effective == PlaybackStep::ThreeHourly {
            rows = playback::regroup_three_hourly(rows, output_tz);
        }
        let frames = playback::build_frames(&rows, start, end, effective, output_tz);

        Ok(PlaybackResponse {
            station_name: self.stations.display_name(&station_id),
            station_id,
            requested_step: step,
            effective_step: effective,
            timezone: timezone.to_string(),
            start: start.with_timezone(&output_tz).fixed_offset(),
            end: end.with_timezone(&output_tz).fixed_offset(),
            frames_planned: frames.len(),
            frames_ready: frames.len(),
            quality_counts: QualityCounts::tally(&frames),
            wind_rose: build_wind_rose(&rows),
            frames,
        })
    }

    pub async fn get_timeframe_analytics(&self, request: TimeframeRequest) -> WindResult<TimeframeAnalytics> {
        if let Some(params) = &request.simulation {
            params.ensure_valid()?;
        }
        let output_tz = resolve_timezone(&request.timezone)?;
        let station_id = self.stations.resolve_selectable(&request.station)?;
        let params = request.simulation.as_ref();

        let mut rows = self.raw_rows(&station_id, request.start, request.end).await?;
        if rows.is_empty() && request.force_refresh_on_empty {
            info!(station = %station_id, "no cached rows; forcing refresh");
            self.retrieval.refresh_data_range(&station_id, request.start, request.end).await?;
            rows = self.raw_rows(&station_id, request.start, request.end).await?;
        }

        let comparison = match (request.compare_start, request.compare_end) {
            (Some(compare_start), Some(compare_end)) if compare_start < compare_end => {
                let baseline = self.raw_rows(&station_id, compare_start, compare_end).await?;
                comparison_deltas(&rows, &baseline, params)
            }
            _ => Vec::new(),
        };

        Ok(TimeframeAnalytics {
            station_name: self.stations.display_name(&station_id),
            station_id,
            group_by: request.group_by,
            timezone: request.timezone.clone(),
            requested_start_utc: request.start,
            requested_end_utc: request.end,
            data_points: rows.len(),
            buckets: group_buckets(&rows, request.group_by, params, self.settings.timezone, output_tz),
            wind_rose: build_wind_rose(&rows),
            comparison,
        })
    }

    async fn raw_rows(&self, station_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> WindResult<Vec<Measurement>> {
        self.retrieval.get_data(station_id, start, end, TimeAggregation::None, &[]).await
    }

    /// Warm the recent cache of the map stations and describe what is available
    /// for every known station.
    pub async fn bootstrap(&self) -> WindResult<Bootstrap> {
        let warm_cache = self.warm_cache().await;
        let store = self.retrieval.store();
        let map_ids = self.stations.map_station_ids();

        let mut latest_observation_by_station = BTreeMap::new();
        let mut suggested_start_by_station = BTreeMap::new();
        let mut latest_snapshots = Vec::new();
        // Availability covers every known station; snapshots only the map ones.
        for profile in self.stations.profiles() {
            let station_id = profile.station_id.clone();
            let latest = store.get_latest_measurement(&station_id).await?;
            let newest = latest.as_ref().map(|m| m.measured_at_utc);
            latest_observation_by_station.insert(station_id.clone(), newest);
            suggested_start_by_station
                .insert(station_id.clone(), newest.map(|t| t - Duration::days(SUGGESTED_HISTORY_DAYS)));
            if map_ids.contains(&station_id) {
                latest_snapshots.extend(latest);
            }
        }

        Ok(Bootstrap {
            checked_at_utc: self.clock.now(),
            stations: self.stations.profiles().to_vec(),
            selectable_station_ids: self.stations.selectable_ids(),
            map_station_ids: map_ids,
            latest_observation_by_station,
            suggested_start_by_station,
            latest_snapshots,
            warm_cache,
        })
    }

    /// Best-effort fetch of recent uncached months for the map stations.
    pub async fn warm_cache(&self) -> WarmCacheReport {
        self.retrieval
            .warm_cache(&self.stations.map_station_ids(), self.settings.cache.warm_cache_hours)
            .await
    }
}
