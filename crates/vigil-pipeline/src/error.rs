//! Pipeline error types.

use std::time::Duration;

use thiserror::Error;
use vigil_vision::VisionError;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Local detector failures. Never fatal to the pipeline.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Detector model failed to load: {0}")]
    Init(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

impl DetectorError {
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Init(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }
}

/// Video source failures.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to open source: {0}")]
    OpenFailed(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn open_failed(msg: impl Into<String>) -> Self {
        Self::OpenFailed(msg.into())
    }
}

/// Specialist escalation failures.
#[derive(Debug, Error)]
pub enum SpecialistError {
    #[error("No specialist provider is configured")]
    Unavailable,

    #[error("Specialist analysis already in progress")]
    AlreadyInProgress,

    #[error("Specialist call budget exhausted, retry in {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error("Specialist provider failed: {0}")]
    Provider(#[from] VisionError),
}

impl SpecialistError {
    /// Errors the caller may retry later without changing anything.
    pub fn is_transient(&self) -> bool {
        match self {
            SpecialistError::AlreadyInProgress | SpecialistError::RateLimited { .. } => true,
            SpecialistError::Provider(e) => e.is_retryable(),
            SpecialistError::Unavailable => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SpecialistError::Unavailable => "unavailable",
            SpecialistError::AlreadyInProgress => "already_in_progress",
            SpecialistError::RateLimited { .. } => "rate_limited",
            SpecialistError::Provider(_) => "provider",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline is already running")]
    AlreadyRunning,

    #[error("No frame available")]
    NoFrame,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Persistence failed: {0}")]
    Sink(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Specialist(#[from] SpecialistError),

    #[error("Frame encoding failed: {0}")]
    Vision(#[from] VisionError),
}

impl PipelineError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }
}

impl From<vigil_firestore::FirestoreError> for PipelineError {
    fn from(e: vigil_firestore::FirestoreError) -> Self {
        Self::Sink(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specialist_transience() {
        assert!(SpecialistError::AlreadyInProgress.is_transient());
        assert!(SpecialistError::RateLimited { retry_after: Duration::from_secs(1) }.is_transient());
        assert!(!SpecialistError::Unavailable.is_transient());
    }

    #[test]
    fn test_specialist_error_kind() {
        assert_eq!(SpecialistError::AlreadyInProgress.kind(), "already_in_progress");
        assert_eq!(
            SpecialistError::RateLimited { retry_after: Duration::from_secs(3) }.kind(),
            "rate_limited"
        );
    }

    #[test]
    fn test_specialist_error_wraps_into_pipeline_error() {
        let err: PipelineError = SpecialistError::Unavailable.into();
        assert!(matches!(err, PipelineError::Specialist(SpecialistError::Unavailable)));
        assert_eq!(err.to_string(), "No specialist provider is configured");
    }
}
