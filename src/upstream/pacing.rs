//! Process-wide pacing gate for upstream requests.
//!
//! The provider enforces one global quota, so every request from every job
//! and request handler goes through the same gate. A caller holds the permit
//! for the duration of its HTTP request; the next caller waits until both the
//! minimum interval since the last request and any 429 cooldown have passed.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct GateState {
    last_request: Option<Instant>,
    cooldown_until: Option<Instant>,
}

impl GateState {
    fn wait_needed(&self, now: Instant, min_interval: Duration) -> Duration {
        let for_interval = self
            .last_request
            .map(|last| (last + min_interval).saturating_duration_since(now))
            .unwrap_or_default();
        let for_cooldown = self
            .cooldown_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default();
        for_interval.max(for_cooldown)
    }
}

#[derive(Debug)]
pub struct PacingGate {
    min_interval: Duration,
    state: Mutex<GateState>,
}

impl PacingGate {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, state: Mutex::new(GateState::default()) }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for the gate to clear and take the single request slot.
    pub async fn acquire(&self) -> PacingPermit<'_> {
        let guard = self.state.lock().await;
        let wait = guard.wait_needed(Instant::now(), self.min_interval);
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "throttling upstream request");
            tokio::time::sleep(wait).await;
        }
        PacingPermit { guard }
    }

    /// Delay to honour after a 429, from the `Retry-After` header.
    ///
    /// Missing or unparsable values fall back to the larger of the minimum
    /// interval and one second.
    pub fn retry_after(&self, headers: &HeaderMap, cap: Duration) -> Duration {
        advertised_retry_after(headers, cap)
            .unwrap_or_else(|| self.min_interval.max(Duration::from_secs(1)))
    }
}

/// `Retry-After` in seconds as sent by the provider, clamped to `[1s, cap]`.
pub fn advertised_retry_after(headers: &HeaderMap, cap: Duration) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let value = raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
    if value < 1.0 {
        Some(Duration::from_secs(1))
    } else {
        Some(Duration::from_secs_f64(value.min(cap.as_secs_f64())))
    }
}

/// Exclusive request slot. Dropping it records the request completion time.
pub struct PacingPermit<'a> {
    guard: MutexGuard<'a, GateState>,
}

impl PacingPermit<'_> {
    /// Block all callers until `retry_after` from now.
    pub fn cooldown(&mut self, retry_after: Duration) {
        let until = Instant::now() + retry_after;
        if self.guard.cooldown_until.map_or(true, |current| until > current) {
            self.guard.cooldown_until = Some(until);
        }
        warn!(cooldown_secs = retry_after.as_secs_f64(), "upstream responded with HTTP 429; applying cooldown");
    }
}

impl Drop for PacingPermit<'_> {
    fn drop(&mut self) {
        self.guard.last_request = Some(Instant::now());
    }
}
