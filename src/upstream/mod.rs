//! Upstream weather provider seam.

pub mod aemet;
pub mod pacing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::domain::Measurement;

pub use aemet::AemetClient;
pub use pacing::PacingGate;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpstreamError {
    #[error("upstream rate limited (HTTP 429){}", fmt_retry_after(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream temporary error: HTTP {status}")]
    Transient { status: u16 },

    #[error("upstream error: {0}")]
    Permanent(String),
}

fn fmt_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(". Retry-After={}s", d.as_secs()),
        None => String::new(),
    }
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, UpstreamError::Permanent(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, retry_after: Option<Duration>, context: &str) -> Self {
        match status {
            429 => UpstreamError::RateLimited { retry_after },
            500 | 502 | 503 | 504 => UpstreamError::Transient { status },
            other => UpstreamError::Permanent(format!("{context} failed with HTTP {other}")),
        }
    }
}

/// Source of station observations for a UTC window.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(
        &self,
        station_id: &str,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
    ) -> Result<Vec<Measurement>, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(429, true)]
    #[case(500, true)]
    #[case(502, true)]
    #[case(503, true)]
    #[case(504, true)]
    #[case(401, false)]
    #[case(404, false)]
    fn test_status_classification(#[case] status: u16, #[case] retryable: bool) {
        assert_eq!(UpstreamError::from_status(status, None, "metadata request").is_retryable(), retryable);
    }

    #[test]
    fn test_rate_limited_display_includes_retry_after() {
        let err = UpstreamError::RateLimited { retry_after: Some(Duration::from_secs(30)) };
        assert_eq!(err.to_string(), "upstream rate limited (HTTP 429). Retry-After=30s");
    }
}
