//! Vision provider error types.

use std::time::Duration;

use thiserror::Error;

pub type VisionResult<T> = Result<T, VisionError>;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Provider returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Image encoding failed: {0}")]
    ImageEncoding(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl VisionError {
    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn image_encoding(msg: impl Into<String>) -> Self {
        Self::ImageEncoding(msg.into())
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        if status == 429 {
            Self::RateLimited { retry_after }
        } else {
            Self::Http { status, body }
        }
    }

    /// HTTP status associated with the error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            VisionError::Http { status, .. } => Some(*status),
            VisionError::RateLimited { .. } => Some(429),
            VisionError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Server-requested delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            VisionError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, VisionError::RateLimited { .. })
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            VisionError::Network(_) | VisionError::RateLimited { .. } => true,
            VisionError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Parse a `Retry-After` header expressed in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn test_429_maps_to_rate_limited() {
        let err = VisionError::from_http_status(429, String::new(), Some(Duration::from_secs(3)));
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(err.http_status(), Some(429));
    }

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(VisionError::from_http_status(503, "busy".into(), None).is_retryable());
        assert!(!VisionError::from_http_status(400, "bad".into(), None).is_retryable());
        assert!(!VisionError::invalid_response("empty").is_retryable());
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);
    }
}
