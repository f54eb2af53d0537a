//! Manual specialist escalation.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::warn;
use vigil_models::{EscalationTrigger, SpecialistProvider, SpecialistResult};

use crate::error::{ApiError, ApiResult};
use crate::metrics::record_escalation_request;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EscalateRequest {
    /// Preferred provider; falls back to the configured order when absent.
    #[serde(default)]
    pub provider: Option<SpecialistProvider>,
}

/// Run a specialist analysis on the latest frame and wait for it.
pub async fn escalate(
    State(state): State<AppState>,
    Json(request): Json<EscalateRequest>,
) -> ApiResult<Json<SpecialistResult>> {
    match state
        .pipeline
        .trigger_specialist(None, EscalationTrigger::Manual, request.provider)
        .await
    {
        Ok(result) => {
            record_escalation_request("ok");
            Ok(Json(result))
        }
        Err(e) => {
            warn!(error = %e, "Manual escalation rejected");
            record_escalation_request("rejected");
            Err(ApiError::from(e))
        }
    }
}
