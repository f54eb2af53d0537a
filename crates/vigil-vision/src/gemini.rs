//! Gemini `generateContent` client for single-frame descriptions.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use vigil_models::TokenUsage;

use crate::config::GeminiConfig;
use crate::error::{parse_retry_after, VisionError, VisionResult};
use crate::frame::EncodedImage;
use crate::metrics::{record_request, record_tokens};
use crate::provider::{Completion, GenerationParams, VisionProvider};

/// Gemini API client.
pub struct GeminiProvider {
    config: GeminiConfig,
    client: Client,
}

/// Gemini API request.
#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    Image {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    #[serde(rename = "mimeType")]
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

/// Gemini API response.
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model,
            self.config.api_key
        )
    }
}

#[async_trait]
impl VisionProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn describe(
        &self,
        prompt: &str,
        image: &EncodedImage,
        params: &GenerationParams,
    ) -> VisionResult<Completion> {
        let request = GeminiRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text { text: prompt },
                    Part::Image {
                        inline_data: InlineData {
                            mime_type: &image.mime_type,
                            data: &image.data,
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
            },
        };

        let start = Instant::now();
        let response = match self.client.post(self.url()).json(&request).send().await {
            Ok(r) => r,
            Err(e) => {
                record_request(self.name(), 0, start.elapsed().as_secs_f64() * 1000.0);
                return Err(VisionError::request_failed(format!(
                    "Gemini API request failed: {}",
                    e
                )));
            }
        };

        let status = response.status();
        record_request(self.name(), status.as_u16(), start.elapsed().as_secs_f64() * 1000.0);

        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let error_text = response.text().await.unwrap_or_default();
            warn!(model = %self.config.model, status = status.as_u16(), "Gemini API returned error");
            return Err(VisionError::from_http_status(status.as_u16(), error_text, retry_after));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            VisionError::invalid_response(format!("Failed to parse Gemini response: {}", e))
        })?;

        let text = gemini_response
            .candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(VisionError::invalid_response("No content in Gemini response"));
        }

        let usage = gemini_response.usage_metadata.map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u
                .total_token_count
                .unwrap_or(u.prompt_token_count + u.candidates_token_count),
        });
        if let Some(u) = usage {
            record_tokens(self.name(), u.prompt_tokens, u.completion_tokens);
        }

        let latency = start.elapsed();
        debug!(
            model = %self.config.model,
            latency_ms = latency.as_millis() as u64,
            chars = text.len(),
            "Gemini response received"
        );

        Ok(Completion { text, usage, latency })
    }
}
