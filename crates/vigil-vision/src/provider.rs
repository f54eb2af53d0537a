//! The provider seam shared by every hosted vision model.

use std::time::Duration;

use async_trait::async_trait;
use vigil_models::TokenUsage;

use crate::error::VisionResult;
use crate::frame::EncodedImage;

/// Sampling parameters for a single request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 300,
            temperature: 0.3,
        }
    }
}

/// Text returned by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub latency: Duration,
}

/// A hosted vision-language model reachable over HTTP.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Short provider name used in logs and metrics.
    fn name(&self) -> &str;

    /// Model identifier sent to the provider.
    fn model(&self) -> &str;

    /// Describe one image. Exactly one outbound request per call.
    async fn describe(
        &self,
        prompt: &str,
        image: &EncodedImage,
        params: &GenerationParams,
    ) -> VisionResult<Completion>;
}
