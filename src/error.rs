//! Crate-level error taxonomy.

use thiserror::Error;

use crate::upstream::UpstreamError;

pub type WindResult<T> = std::result::Result<T, WindError>;

#[derive(Debug, Error)]
pub enum WindError {
    /// Caller input that can never succeed as submitted.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid range: start {start} must be before end {end}")]
    InvalidRange { start: String, end: String },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WindError {
    pub fn validation(message: impl Into<String>) -> Self {
        WindError::Validation(message.into())
    }

    /// Whether a backfill worker may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WindError::Upstream(e) if e.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_classification() {
        assert!(WindError::from(UpstreamError::RateLimited { retry_after: Some(Duration::from_secs(5)) }).is_retryable());
        assert!(WindError::from(UpstreamError::Transient { status: 503 }).is_retryable());
        assert!(!WindError::from(UpstreamError::Permanent("HTTP 401".into())).is_retryable());
        assert!(!WindError::validation("bad station").is_retryable());
    }

    #[test]
    fn test_display_passes_upstream_detail_through() {
        let err = WindError::from(UpstreamError::Transient { status: 502 });
        assert_eq!(err.to_string(), "upstream temporary error: HTTP 502");
    }
}
