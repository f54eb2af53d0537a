//! API error types.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use vigil_pipeline::{PipelineError, SourceError, SpecialistError};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Rate limited, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Conflict(_) => "conflict",
            ApiError::Unprocessable(_) => "unprocessable",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let msg = e.to_string();
        match e {
            PipelineError::AlreadyRunning | PipelineError::NoFrame => Self::Conflict(msg),
            PipelineError::ConfigError(_) => Self::BadRequest(msg),
            PipelineError::Source(SourceError::Unavailable(_)) => Self::Unprocessable(msg),
            PipelineError::Source(_) => Self::BadRequest(msg),
            PipelineError::Specialist(SpecialistError::Unavailable) => Self::Unavailable(msg),
            PipelineError::Specialist(SpecialistError::AlreadyInProgress) => Self::Conflict(msg),
            PipelineError::Specialist(SpecialistError::RateLimited { retry_after }) => {
                Self::RateLimited { retry_after }
            }
            PipelineError::Specialist(SpecialistError::Provider(_)) => Self::Upstream(msg),
            PipelineError::Sink(_) | PipelineError::TaskFailed(_) | PipelineError::Vision(_) => {
                Self::Internal(msg)
            }
        }
    }
}

impl From<SourceError> for ApiError {
    fn from(e: SourceError) -> Self {
        PipelineError::from(e).into()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = match &self {
            ApiError::Internal(_) if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" => {
                "An internal error occurred".to_string()
            }
            _ => self.to_string(),
        };

        let retry_after = match &self {
            // Round up so clients never retry early
            ApiError::RateLimited { retry_after } => {
                Some(retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0))
            }
            _ => None,
        };

        let body = ErrorResponse {
            detail,
            code: self.code(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_errors_map_to_status() {
        let cases = [
            (PipelineError::AlreadyRunning, StatusCode::CONFLICT),
            (
                PipelineError::Specialist(SpecialistError::Unavailable),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                PipelineError::Specialist(SpecialistError::AlreadyInProgress),
                StatusCode::CONFLICT,
            ),
            (
                PipelineError::Source(SourceError::unavailable("embedded player")),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (PipelineError::TaskFailed("panic".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let err = ApiError::from(PipelineError::Specialist(SpecialistError::RateLimited {
            retry_after: Duration::from_millis(12_300),
        }));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "13");
    }
}
