//! Asynchronous multi-window history backfill.

pub mod registry;
pub mod retry;
pub mod worker;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analytics::playback::frame_count;
use crate::clock::Clock;
use crate::config::{CacheConfig, JobsConfig};
use crate::domain::window;
use crate::domain::{
    BackfillJob, JobStatus, MeasurementType, PlaybackStep, StationPolicy, TimeAggregation, TimeWindow, WindowState,
};
use crate::error::{WindError, WindResult};
use crate::repo::MeasurementStore;
use crate::retrieval::RetrievalCoordinator;

pub use registry::WorkerRegistry;
pub use retry::{RecordingSleeper, RetryDecision, RetryPolicy, Sleeper, TokioSleeper};
pub use worker::BackfillWorker;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub station: String,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default = "default_job_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub playback_step: PlaybackStep,
    #[serde(default)]
    pub aggregation: TimeAggregation,
    #[serde(default)]
    pub selected_types: Vec<MeasurementType>,
    #[serde(default)]
    pub history_start: Option<DateTime<Utc>>,
}

fn default_job_timezone() -> String {
    "UTC".to_string()
}

/// Externally visible view of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub station_id: String,
    pub requested_start_utc: DateTime<Utc>,
    pub effective_end_utc: DateTime<Utc>,
    pub history_start_utc: DateTime<Utc>,
    pub total_windows: usize,
    pub cached_windows: usize,
    pub missing_windows: usize,
    pub completed_windows: usize,
    pub total_api_calls_planned: u32,
    pub completed_api_calls: u32,
    pub frames_planned: usize,
    pub frames_ready: usize,
    pub playback_ready: bool,
    pub percent: f64,
    pub message: String,
    pub error_detail: Option<String>,
    pub updated_at_utc: DateTime<Utc>,
}

impl From<&BackfillJob> for JobStatusView {
    fn from(job: &BackfillJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            station_id: job.station_id.clone(),
            requested_start_utc: job.requested_start_utc,
            effective_end_utc: job.effective_end_utc,
            history_start_utc: job.history_start_utc,
            total_windows: job.total_windows,
            cached_windows: job.cached_windows,
            missing_windows: job.missing_windows,
            completed_windows: job.completed_windows,
            total_api_calls_planned: job.total_api_calls_planned,
            completed_api_calls: job.completed_api_calls,
            frames_planned: job.frames_planned,
            frames_ready: job.frames_ready,
            playback_ready: job.playback_ready,
            percent: job.percent(),
            message: job.message.clone(),
            error_detail: job.error_detail.clone(),
            updated_at_utc: job.updated_at_utc,
        }
    }
}

/// Plans backfill jobs and hands missing windows to workers.
pub struct BackfillOrchestrator {
    retrieval: Arc<RetrievalCoordinator>,
    worker: BackfillWorker,
    registry: Arc<WorkerRegistry>,
    clock: Arc<dyn Clock>,
    stations: StationPolicy,
    jobs: JobsConfig,
    freshness: Duration,
}

impl BackfillOrchestrator {
    pub fn new(
        retrieval: Arc<RetrievalCoordinator>,
        worker: BackfillWorker,
        registry: Arc<WorkerRegistry>,
        clock: Arc<dyn Clock>,
        jobs: JobsConfig,
        cache: &CacheConfig,
    ) -> Self {
        Self {
            retrieval,
            worker,
            registry,
            clock,
            stations: StationPolicy,
            jobs,
            freshness: Duration::hours(cache.current_month_freshness_hours),
        }
    }

    fn store(&self) -> &Arc<dyn MeasurementStore> {
        self.retrieval.store()
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub async fn create_job(&self, request: CreateJobRequest) -> WindResult<JobStatusView> {
        let station_id = self.stations.resolve_selectable(&request.station)?;
        let now = self.clock.now();

        let effective_end = match request.end {
            Some(end) => end,
            None => self
                .retrieval
                .get_latest_availability(&station_id)
                .await?
                .newest_observation_utc
                .ok_or_else(|| {
                    WindError::validation(format!(
                        "No recent observations are available for station '{station_id}'; provide an explicit end."
                    ))
                })?,
        };
        TimeWindow::new(request.start, effective_end)?;
        let history_start = request.history_start.unwrap_or(request.start).min(request.start);

        let mut windows = Vec::new();
        for planned in window::split(history_start, effective_end)? {
            let cached = if planned.end_utc > now {
                self.store().has_fresh_window(&station_id, &planned, now - self.freshness).await?
            } else {
                self.store().has_cached_window(&station_id, &planned).await?
            };
            windows.push(WindowState::planned(planned, cached, self.jobs.api_calls_per_window));
        }

        let total = windows.len();
        let cached = windows.iter().filter(|w| w.status.has_data()).count();
        let missing = total - cached;
        let frames_planned = frame_count(request.start, effective_end, request.playback_step).max(1);
        let complete = missing == 0;

        let mut job = BackfillJob {
            job_id: Uuid::new_v4().simple().to_string(),
            station_id: station_id.clone(),
            requested_start_utc: request.start,
            effective_end_utc: effective_end,
            history_start_utc: history_start,
            timezone: request.timezone,
            aggregation: request.aggregation,
            selected_types: request.selected_types,
            playback_step: request.playback_step,
            status: if complete { JobStatus::Complete } else { JobStatus::Pending },
            total_windows: total,
            cached_windows: cached,
            missing_windows: missing,
            completed_windows: cached,
            total_api_calls_planned: windows.iter().map(|w| w.api_calls_planned).sum(),
            completed_api_calls: 0,
            frames_planned,
            frames_ready: if complete { frames_planned } else { 0 },
            playback_ready: complete,
            message: if complete {
                "Ready from cache.".to_string()
            } else {
                "Queued missing windows for fetch.".to_string()
            },
            error_detail: None,
            windows,
            created_at_utc: now,
            updated_at_utc: now,
        };
        if !complete {
            job.refresh_progress();
        }
        self.store().upsert_job(&job).await?;

        if !complete {
            if self.jobs.background_enabled {
                self.spawn_worker(&job.job_id);
            } else {
                job.message = "Queued missing months. Fetch progresses with status polling.".to_string();
                self.store().upsert_job(&job).await?;
            }
        }

        info!(
            job_id = %job.job_id,
            station = %station_id,
            total,
            cached,
            missing,
            planned_calls = job.total_api_calls_planned,
            "backfill job created"
        );
        Ok(JobStatusView::from(&job))
    }

    /// Fresh job snapshot, advancing an unfinished job first.
    pub async fn get_job_status(&self, job_id: &str) -> WindResult<JobStatusView> {
        let job = self.load(job_id).await?;
        if !job.status.is_terminal() {
            if self.jobs.background_enabled {
                self.spawn_worker(job_id);
            } else {
                self.worker.run(job_id, Some(self.jobs.drive_by_max_windows)).await?;
            }
        }
        let job = self.load(job_id).await?;
        Ok(JobStatusView::from(&job))
    }

    pub async fn load(&self, job_id: &str) -> WindResult<BackfillJob> {
        self.store()
            .get_job(job_id)
            .await?
            .ok_or_else(|| WindError::validation(format!("Query job '{job_id}' was not found.")))
    }

    fn spawn_worker(&self, job_id: &str) -> bool {
        let worker = self.worker.clone();
        let id = job_id.to_string();
        self.registry.start_if_idle(job_id, async move {
            if let Err(err) = worker.run(&id, None).await {
                warn!(job_id = %id, error = %err, "backfill worker stopped with an error");
            }
        })
    }
}
