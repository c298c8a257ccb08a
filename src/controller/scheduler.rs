use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

use crate::engine::WindEngine;
use crate::retrieval::WarmCacheReport;

/// Periodic task configuration
#[derive(Debug, Clone)]
pub struct PeriodicTaskConfig {
    /// Warm-cache interval (seconds)
    pub warm_cache_interval_secs: u64,
}

impl Default for PeriodicTaskConfig {
    fn default() -> Self {
        Self { warm_cache_interval_secs: 3600 }
    }
}

/// Task status tracking
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

impl TaskStatus {
    fn record(&mut self, at: DateTime<Utc>, report: &WarmCacheReport) {
        self.last_run = Some(at);
        self.run_count += 1;
        if report.failed == 0 {
            self.last_success = Some(at);
            self.success_count += 1;
            self.last_error = None;
        } else {
            self.error_count += 1;
            self.last_error = Some(format!("{} window fetches failed", report.failed));
        }
    }
}

/// Periodic task scheduler
pub struct TaskScheduler {
    config: PeriodicTaskConfig,
    engine: Arc<WindEngine>,
    warm_cache_status: Arc<RwLock<TaskStatus>>,
}

impl TaskScheduler {
    pub fn new(engine: Arc<WindEngine>, config: PeriodicTaskConfig) -> Self {
        Self {
            config,
            engine,
            warm_cache_status: Arc::new(RwLock::new(TaskStatus::default())),
        }
    }

    /// Start all periodic tasks
    pub fn start(self: Arc<Self>) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_warm_cache_task().await;
        });
        info!(every_secs = self.config.warm_cache_interval_secs, "warm-cache task started");
    }

    pub async fn warm_cache_status(&self) -> TaskStatus {
        self.warm_cache_status.read().await.clone()
    }

    async fn run_warm_cache_task(&self) {
        let mut interval = interval(Duration::from_secs(self.config.warm_cache_interval_secs.max(60)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.warm_once().await;
        }
    }

    /// One warm-cache pass. Failures are counted, never propagated.
    pub async fn warm_once(&self) -> WarmCacheReport {
        let now = Utc::now();
        let report = self.engine.warm_cache().await;
        self.warm_cache_status.write().await.record(now, &report);
        if report.failed > 0 {
            warn!(fetched = report.fetched, failed = report.failed, "warm cache pass had failures");
        } else {
            info!(fetched = report.fetched, skipped = report.skipped, "warm cache pass complete");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_counts_failures() {
        let mut status = TaskStatus::default();
        let at = Utc::now();
        status.record(at, &WarmCacheReport { fetched: 2, skipped: 0, failed: 0 });
        status.record(at, &WarmCacheReport { fetched: 0, skipped: 1, failed: 1 });

        assert_eq!(status.run_count, 2);
        assert_eq!(status.success_count, 1);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_error.as_deref(), Some("1 window fetches failed"));
    }
}
