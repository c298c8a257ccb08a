use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::debug;

/// At most one live background worker per job id.
///
/// The lock guards only the map and is released before anything is awaited.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` for `job_id` unless a worker for it is still running.
    /// Returns whether a new worker was started.
    pub fn start_if_idle<F>(&self, job_id: &str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut workers = self.workers.lock();
        workers.retain(|_, handle| !handle.is_finished());
        if workers.contains_key(job_id) {
            debug!(job_id, "worker already running");
            return false;
        }
        workers.insert(job_id.to_string(), tokio::spawn(task));
        debug!(job_id, "worker started");
        true
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.workers
            .lock()
            .get(job_id)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.workers.lock().values().filter(|h| !h.is_finished()).count()
    }

    /// Wait for the current worker of `job_id`, if any.
    pub async fn join(&self, job_id: &str) {
        let handle = self.workers.lock().remove(job_id);
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
