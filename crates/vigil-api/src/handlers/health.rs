//! Health check handlers.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Which layers have credentials and whether a session is running.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub running: bool,
    pub analyst_available: bool,
    pub specialist_available: bool,
}

/// Readiness endpoint. Missing providers degrade, they never fail the probe.
pub async fn ready(State(state): State<AppState>) -> Json<ReadinessResponse> {
    let snapshot = state.pipeline.state();
    let analyst_available = snapshot.analyst.available;
    let specialist_available = snapshot.specialist.available;

    Json(ReadinessResponse {
        status: if analyst_available && specialist_available { "ready" } else { "degraded" }.to_string(),
        running: snapshot.running,
        analyst_available,
        specialist_available,
    })
}
