//! Structured session logging.
//!
//! Consistent log lines for pipeline lifecycle events with the session ID
//! and layer attached to every record.

use tracing::{error, info, warn, Span};
use vigil_models::SessionId;

/// Session-scoped logger for one pipeline layer.
#[derive(Debug, Clone)]
pub struct PipelineLogger {
    session_id: String,
    layer: &'static str,
}

impl PipelineLogger {
    /// Create a logger for a session and layer (e.g. "orchestrator", "specialist").
    pub fn new(session_id: &SessionId, layer: &'static str) -> Self {
        Self {
            session_id: session_id.to_string(),
            layer,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            session_id = %self.session_id,
            layer = self.layer,
            "Pipeline started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            session_id = %self.session_id,
            layer = self.layer,
            "Pipeline progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            session_id = %self.session_id,
            layer = self.layer,
            "Pipeline warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            session_id = %self.session_id,
            layer = self.layer,
            "Pipeline error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            session_id = %self.session_id,
            layer = self.layer,
            "Pipeline stopped: {}", message
        );
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn layer(&self) -> &str {
        self.layer
    }

    /// Span for instrumenting the tasks of this session.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "pipeline",
            session_id = %self.session_id,
            layer = self.layer
        )
    }

    /// Same session, different layer.
    pub fn for_layer(&self, layer: &'static str) -> Self {
        Self {
            session_id: self.session_id.clone(),
            layer,
        }
    }
}
