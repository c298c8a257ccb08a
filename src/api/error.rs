use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::error::WindError;
use crate::upstream::UpstreamError;

/// API error types that can be returned from handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Upstream rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Upstream error: {0}")]
    BadGateway(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error response that gets serialized to JSON
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl ApiError {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type string
    fn error_type(&self) -> &'static str {
        match self {
            ApiError::ValidationError(_) => "ValidationError",
            ApiError::RateLimited { .. } => "UpstreamRateLimited",
            ApiError::BadGateway(_) => "UpstreamError",
            ApiError::InternalError(_) => "InternalServerError",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();

        let message = match &self {
            ApiError::InternalError(_) => {
                tracing::error!(error = %self, "API error occurred");
                "An internal error occurred".to_string()
            }
            ApiError::BadGateway(_) | ApiError::RateLimited { .. } => {
                tracing::warn!(error = %self, "Upstream failure");
                self.to_string()
            }
            _ => {
                tracing::debug!(error = %self, "Client error");
                self.to_string()
            }
        };

        let retry_after = match &self {
            ApiError::RateLimited { retry_after: Some(d) } => HeaderValue::from_str(&d.as_secs().max(1).to_string()).ok(),
            _ => None,
        };

        let mut response = (status, Json(ErrorResponse { error: error_type.to_string(), message })).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

impl From<WindError> for ApiError {
    fn from(error: WindError) -> Self {
        match error {
            WindError::Validation(message) => ApiError::ValidationError(message),
            e @ WindError::InvalidRange { .. } => ApiError::ValidationError(e.to_string()),
            WindError::Upstream(UpstreamError::RateLimited { retry_after }) => ApiError::RateLimited { retry_after },
            WindError::Upstream(e) => ApiError::BadGateway(e.to_string()),
            WindError::Internal(e) => ApiError::InternalError(format!("{e:#}")),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::InternalError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::from(WindError::validation("bad station")).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(WindError::InvalidRange { start: "b".into(), end: "a".into() }).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(WindError::from(UpstreamError::RateLimited { retry_after: None })).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::from(WindError::from(UpstreamError::Transient { status: 503 })).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(WindError::Internal(anyhow::anyhow!("disk full"))).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rate_limit_sets_retry_after_header() {
        let response = ApiError::RateLimited { retry_after: Some(Duration::from_secs(12)) }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "12");
    }

    #[test]
    fn test_error_display() {
        let error = ApiError::from(WindError::from(UpstreamError::Permanent("HTTP 401".into())));
        assert_eq!(error.to_string(), "Upstream error: upstream error: HTTP 401");
    }
}
