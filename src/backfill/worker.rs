use chrono::Datelike;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::retry::{RetryDecision, RetryPolicy, Sleeper};
use crate::clock::Clock;
use crate::domain::window::start_of_month;
use crate::domain::{BackfillJob, JobStatus, Measurement, WindowStatus};
use crate::error::{WindError, WindResult};
use crate::repo::MeasurementStore;
use crate::upstream::{UpstreamError, WeatherSource};

type MonthPartition = HashMap<(i32, u32), Vec<Measurement>>;

/// Drives one job's missing windows to completion or failure.
#[derive(Clone)]
pub struct BackfillWorker {
    store: Arc<dyn MeasurementStore>,
    source: Arc<dyn WeatherSource>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl BackfillWorker {
    pub fn new(
        store: Arc<dyn MeasurementStore>,
        source: Arc<dyn WeatherSource>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
    ) -> Self {
        Self { store, source, clock, sleeper, policy }
    }

    async fn persist(&self, job: &mut BackfillJob) -> WindResult<()> {
        job.updated_at_utc = self.clock.now();
        self.store.upsert_job(job).await?;
        Ok(())
    }

    /// Process the job's pending windows.
    ///
    /// With `max_windows` set, returns after that many windows have been
    /// stored and leaves the job `running` for the next call.
    #[instrument(skip(self))]
    pub async fn run(&self, job_id: &str, max_windows: Option<usize>) -> WindResult<()> {
        let Some(mut job) = self.store.get_job(job_id).await? else {
            warn!("backfill job vanished before its worker ran");
            return Ok(());
        };
        if job.status.is_terminal() {
            return Ok(());
        }

        job.status = JobStatus::Running;
        job.message = "Fetching missing months from AEMET.".to_string();
        self.persist(&mut job).await?;

        if job.windows.is_empty() {
            return self.finish(&mut job, "No fetch required.").await;
        }

        let prefetched = self.bulk_prefetch(&job).await;
        let max_windows = if prefetched.is_some() { None } else { max_windows };
        let total = job.windows.len();
        let mut processed = 0usize;

        for index in 0..total {
            if job.windows[index].status.has_data() {
                continue;
            }
            if !self.fetch_window(&mut job, index, prefetched.as_ref()).await? {
                return Ok(());
            }

            job.refresh_progress();
            self.persist(&mut job).await?;
            processed += 1;

            if let Some(limit) = max_windows {
                if processed >= limit && job.completed_windows < job.total_windows {
                    job.message = format!("Fetching months: {}/{} loaded.", job.completed_windows, job.total_windows);
                    self.persist(&mut job).await?;
                    return Ok(());
                }
            }
        }

        self.finish(&mut job, "All requested months are available in cache.").await
    }

    async fn finish(&self, job: &mut BackfillJob, message: &str) -> WindResult<()> {
        job.status = JobStatus::Complete;
        job.error_detail = None;
        job.message = message.to_string();
        job.refresh_progress();
        self.persist(job).await?;
        info!(
            station = %job.station_id,
            windows = job.total_windows,
            api_calls = job.completed_api_calls,
            "backfill job complete"
        );
        Ok(())
    }

    /// One upstream call covering the month of `effective_end`. Rows are
    /// partitioned by calendar month; `None` means fall back to per-window
    /// fetches.
    async fn bulk_prefetch(&self, job: &BackfillJob) -> Option<MonthPartition> {
        let start = start_of_month(job.effective_end_utc);
        if start >= job.effective_end_utc {
            return None;
        }
        match self.source.fetch(&job.station_id, start, job.effective_end_utc).await {
            Ok(rows) if !rows.is_empty() => {
                let mut partition = MonthPartition::new();
                for row in rows {
                    let key = (row.measured_at_utc.year(), row.measured_at_utc.month());
                    partition.entry(key).or_default().push(row);
                }
                info!(months = partition.len(), "bulk prefetch satisfied the job");
                Some(partition)
            }
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "bulk prefetch failed; fetching per window");
                None
            }
        }
    }

    /// Attempt one window until it is stored or retries run out.
    /// Returns `false` when the job has been failed.
    async fn fetch_window(
        &self,
        job: &mut BackfillJob,
        index: usize,
        prefetched: Option<&MonthPartition>,
    ) -> WindResult<bool> {
        let window = job.windows[index].window();
        let position = index + 1;
        let total = job.windows.len();

        job.windows[index].status = WindowStatus::Running;
        self.persist(job).await?;

        loop {
            job.windows[index].attempts += 1;
            let attempt = job.windows[index].attempts;

            let outcome = match prefetched {
                Some(partition) => Ok(partition.get(&window.month_key()).cloned().unwrap_or_default()),
                None => self.source.fetch(&job.station_id, window.start_utc, window.end_utc).await,
            };
            let stored = match outcome {
                Ok(rows) => self
                    .store
                    .upsert_measurements(&job.station_id, &rows, &window, self.clock.now())
                    .await
                    .map_err(WindError::from),
                Err(err) => Err(WindError::from(err)),
            };

            let err = match stored {
                Ok(_) => {
                    let state = &mut job.windows[index];
                    state.status = WindowStatus::Complete;
                    state.api_calls_completed = state.api_calls_planned;
                    state.error_detail = None;
                    return Ok(true);
                }
                Err(err) => err,
            };

            let detail = err.to_string();
            job.windows[index].error_detail = Some(detail.clone());

            let decision = match &err {
                WindError::Upstream(upstream) => self.policy.decide(attempt, upstream),
                _ => RetryDecision::GiveUp,
            };
            if let RetryDecision::RetryAfter(delay) = decision {
                job.windows[index].status = WindowStatus::Pending;
                job.message = retry_message(&err, position, total, delay);
                job.refresh_progress();
                self.persist(job).await?;
                warn!(%window, attempt, delay_ms = delay.as_millis() as u64, error = %detail, "retrying window");
                self.sleeper.sleep(delay).await;
                continue;
            }

            error!(%window, attempt, error = %detail, "backfill window failed");
            job.windows[index].status = WindowStatus::Failed;
            job.status = JobStatus::Failed;
            job.error_detail = Some(detail);
            job.message = "Backfill failed for at least one month.".to_string();
            job.refresh_progress();
            self.persist(job).await?;
            return Ok(false);
        }
    }
}

fn retry_message(err: &WindError, position: usize, total: usize, delay: std::time::Duration) -> String {
    match err {
        WindError::Upstream(UpstreamError::RateLimited { .. }) => format!(
            "AEMET rate limited on month {position}/{total}. Retrying with {}s pacing.",
            delay.as_secs_f64().ceil() as u64
        ),
        _ => format!("AEMET temporary upstream error on month {position}/{total}. Will retry."),
    }
}
