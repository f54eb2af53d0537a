//! Application state.

use std::sync::Arc;

use tracing::{info, warn};
use vigil_firestore::{AnalysisRepository, FirestoreClient, FirestoreConfig};
use vigil_pipeline::{
    DecodeOptions, FirestoreSink, NoopSink, Pipeline, PipelineBuilder, PipelineConfig, ResultSink,
};
use vigil_vision::ProviderConfig;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub pipeline: Pipeline,
    pub decode: DecodeOptions,
}

impl AppState {
    pub fn new(config: ApiConfig, pipeline: Pipeline, decode: DecodeOptions) -> Self {
        Self {
            config,
            pipeline,
            decode,
        }
    }

    /// Build the pipeline from environment: providers, tuning and the sink.
    pub async fn from_env(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let pipeline_config = PipelineConfig::from_env()?;
        pipeline_config.validate()?;
        let providers = ProviderConfig::from_env();

        let sink = result_sink(pipeline_config.sink_writes_per_second).await;
        let decode = DecodeOptions {
            fps: pipeline_config.target_fps,
            ..DecodeOptions::default()
        };
        let pipeline = PipelineBuilder::from_providers(pipeline_config, &providers)?
            .with_sink(sink)
            .build();

        Ok(Self::new(config, pipeline, decode))
    }
}

/// Firestore when configured, otherwise results are not persisted.
async fn result_sink(writes_per_second: u32) -> Arc<dyn ResultSink> {
    let config = match FirestoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            warn!("Firestore not configured, results will not be persisted: {}", e);
            return Arc::new(NoopSink);
        }
    };

    match FirestoreClient::new(config).await {
        Ok(client) => {
            info!(writes_per_second, "Persisting analysis results to Firestore");
            Arc::new(FirestoreSink::new(AnalysisRepository::new(client), writes_per_second))
        }
        Err(e) => {
            warn!("Failed to create Firestore client, results will not be persisted: {}", e);
            Arc::new(NoopSink)
        }
    }
}
