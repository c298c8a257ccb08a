use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::measurement::{MeasurementType, TimeAggregation};
use super::window::TimeWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WindowStatus {
    Pending,
    Running,
    Cached,
    Complete,
    Failed,
}

impl WindowStatus {
    /// The window's rows are in the store.
    pub fn has_data(self) -> bool {
        matches!(self, WindowStatus::Cached | WindowStatus::Complete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PlaybackStep {
    #[serde(rename = "10m")]
    #[strum(serialize = "10m")]
    TenMinutes,
    #[default]
    #[serde(rename = "1h")]
    #[strum(serialize = "1h")]
    Hourly,
    #[serde(rename = "3h")]
    #[strum(serialize = "3h")]
    ThreeHourly,
    #[serde(rename = "1d")]
    #[strum(serialize = "1d")]
    Daily,
}

impl PlaybackStep {
    pub fn duration(self) -> chrono::Duration {
        match self {
            PlaybackStep::TenMinutes => chrono::Duration::minutes(10),
            PlaybackStep::Hourly => chrono::Duration::hours(1),
            PlaybackStep::ThreeHourly => chrono::Duration::hours(3),
            PlaybackStep::Daily => chrono::Duration::days(1),
        }
    }

    /// Next coarser step, `None` once at a day.
    pub fn coarser(self) -> Option<Self> {
        match self {
            PlaybackStep::TenMinutes => Some(PlaybackStep::Hourly),
            PlaybackStep::Hourly => Some(PlaybackStep::ThreeHourly),
            PlaybackStep::ThreeHourly => Some(PlaybackStep::Daily),
            PlaybackStep::Daily => None,
        }
    }
}

/// Progress of one calendar-month window inside a backfill job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowState {
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub status: WindowStatus,
    pub attempts: u32,
    pub api_calls_planned: u32,
    pub api_calls_completed: u32,
    pub error_detail: Option<String>,
}

impl WindowState {
    pub fn planned(window: TimeWindow, cached: bool, calls_per_window: u32) -> Self {
        Self {
            start_utc: window.start_utc,
            end_utc: window.end_utc,
            status: if cached { WindowStatus::Cached } else { WindowStatus::Pending },
            attempts: 0,
            api_calls_planned: if cached { 0 } else { calls_per_window },
            api_calls_completed: 0,
            error_detail: None,
        }
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow { start_utc: self.start_utc, end_utc: self.end_utc }
    }
}

/// Persisted backfill job. Only the worker owning `job_id` mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillJob {
    pub job_id: String,
    pub station_id: String,
    pub requested_start_utc: DateTime<Utc>,
    pub effective_end_utc: DateTime<Utc>,
    pub history_start_utc: DateTime<Utc>,
    pub timezone: String,
    pub aggregation: TimeAggregation,
    pub selected_types: Vec<MeasurementType>,
    pub playback_step: PlaybackStep,
    pub status: JobStatus,
    pub total_windows: usize,
    pub cached_windows: usize,
    pub missing_windows: usize,
    pub completed_windows: usize,
    pub total_api_calls_planned: u32,
    pub completed_api_calls: u32,
    pub frames_planned: usize,
    pub frames_ready: usize,
    pub playback_ready: bool,
    pub message: String,
    pub error_detail: Option<String>,
    pub windows: Vec<WindowState>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

impl BackfillJob {
    /// Recompute the derived counters from the window list.
    pub fn refresh_progress(&mut self) {
        self.completed_windows = self.windows.iter().filter(|w| w.status.has_data()).count();
        self.completed_api_calls = self.windows.iter().map(|w| w.api_calls_completed).sum();
        let total = self.total_windows.max(1);
        let planned = self.frames_planned.max(1);
        let ready = (self.completed_windows as f64 / total as f64 * planned as f64) as usize;
        self.frames_ready = ready.min(planned);
        self.playback_ready = self.completed_windows == self.total_windows;
    }

    /// Share of planned upstream calls already made, in percent.
    pub fn percent(&self) -> f64 {
        if self.total_api_calls_planned > 0 {
            let raw = self.completed_api_calls as f64 / self.total_api_calls_planned as f64 * 100.0;
            (raw * 100.0).round() / 100.0
        } else if self.status == JobStatus::Complete {
            100.0
        } else {
            0.0
        }
    }

    /// Earliest window start whose rows are already stored.
    pub fn oldest_available_start(&self) -> Option<DateTime<Utc>> {
        self.windows.iter().filter(|w| w.status.has_data()).map(|w| w.start_utc).min()
    }
}
