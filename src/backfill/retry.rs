use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use crate::upstream::UpstreamError;

const MIN_BACKOFF: Duration = Duration::from_millis(500);

/// What a worker does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Bounded retries for upstream failures inside backfill jobs.
///
/// Rate limits wait for the advertised `Retry-After`, or twice the base
/// backoff when none was sent. Transient HTTP failures wait the base backoff.
/// Permanent failures are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_interval: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), min_interval }
    }

    fn base(&self) -> Duration {
        self.min_interval.max(MIN_BACKOFF)
    }

    pub fn delay_for(&self, error: &UpstreamError) -> Option<Duration> {
        match error {
            UpstreamError::RateLimited { retry_after } => Some(retry_after.unwrap_or(self.base() * 2)),
            UpstreamError::Transient { .. } => Some(self.base()),
            UpstreamError::Permanent(_) => None,
        }
    }

    /// `attempt` is 1-based and counts the attempt that just failed.
    pub fn decide(&self, attempt: u32, error: &UpstreamError) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        self.delay_for(error)
            .map(RetryDecision::RetryAfter)
            .unwrap_or(RetryDecision::GiveUp)
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.slept.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(4, Duration::from_secs(2))
    }

    #[rstest]
    #[case(UpstreamError::RateLimited { retry_after: Some(Duration::from_secs(30)) }, Some(Duration::from_secs(30)))]
    #[case(UpstreamError::RateLimited { retry_after: None }, Some(Duration::from_secs(4)))]
    #[case(UpstreamError::Transient { status: 502 }, Some(Duration::from_secs(2)))]
    #[case(UpstreamError::Permanent("HTTP 403".into()), None)]
    fn test_delay_per_error(#[case] error: UpstreamError, #[case] expected: Option<Duration>) {
        assert_eq!(policy().delay_for(&error), expected);
    }

    #[test]
    fn test_small_interval_uses_floor() {
        let policy = RetryPolicy::new(4, Duration::ZERO);
        assert_eq!(policy.delay_for(&UpstreamError::Transient { status: 500 }), Some(MIN_BACKOFF));
    }

    #[test]
    fn test_attempts_are_bounded() {
        let err = UpstreamError::Transient { status: 503 };
        assert_eq!(policy().decide(3, &err), RetryDecision::RetryAfter(Duration::from_secs(2)));
        assert_eq!(policy().decide(4, &err), RetryDecision::GiveUp);
    }

    #[tokio::test]
    async fn test_recording_sleeper() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_secs(1)).await;
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(1)]);
    }
}
