//! Pipeline lifecycle and state handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::info;
use vigil_models::PipelineState;
use vigil_pipeline::{open_source, VideoSourceSpec};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub session_id: String,
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub stopped: bool,
}

/// Current merged snapshot.
pub async fn get_state(State(state): State<AppState>) -> Json<PipelineState> {
    Json(state.pipeline.state())
}

/// Open the requested source and start a session on it.
pub async fn start_pipeline(
    State(state): State<AppState>,
    Json(spec): Json<VideoSourceSpec>,
) -> ApiResult<Json<StartResponse>> {
    let source = open_source(&spec, state.decode).await?;
    let description = source.describe();
    let session_id = state.pipeline.start(source)?;

    info!(session_id = %session_id.as_str(), source = %description, "Pipeline started via API");
    Ok(Json(StartResponse {
        session_id: session_id.0,
        source: description,
    }))
}

/// Stop the running session. Stopping an idle pipeline is not an error.
pub async fn stop_pipeline(State(state): State<AppState>) -> Json<StopResponse> {
    let was_running = state.pipeline.is_running();
    state.pipeline.stop();
    Json(StopResponse {
        stopped: was_running,
    })
}
