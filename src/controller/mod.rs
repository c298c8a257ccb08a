pub mod scheduler;

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backfill::TokioSleeper;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::engine::{EngineSettings, WindEngine};
use crate::repo;
use crate::upstream::{AemetClient, PacingGate};

pub use scheduler::{PeriodicTaskConfig, TaskScheduler, TaskStatus};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub engine: Arc<WindEngine>,
    pub scheduler: Arc<TaskScheduler>,
}

impl AppState {
    pub async fn new(cfg: Config) -> Result<Self> {
        if cfg.upstream.api_key().is_none() {
            warn!("no AEMET API key configured; upstream fetches will fail until AWC__UPSTREAM__API_KEY is set");
        }

        let store = repo::open_store(&cfg).await?;
        let gate = Arc::new(PacingGate::new(cfg.upstream.min_request_interval()));
        let source = Arc::new(AemetClient::new(&cfg.upstream, gate)?);
        let settings = EngineSettings::from_config(&cfg)?;

        let engine = Arc::new(WindEngine::new(
            settings,
            store,
            source,
            Arc::new(SystemClock),
            Arc::new(TokioSleeper),
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            engine.clone(),
            PeriodicTaskConfig {
                warm_cache_interval_secs: cfg.cache.warm_cache_interval_minutes * 60,
            },
        ));

        info!(timezone = %cfg.analytics.local_timezone, "engine ready");
        Ok(Self { cfg, engine, scheduler })
    }
}

pub fn spawn_controller_tasks(state: &AppState) {
    state.scheduler.clone().start();
}
