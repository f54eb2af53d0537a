//! OpenAI-compatible chat-completions client.
//!
//! Used for NVIDIA NIM and xAI, which share the request shape:
//! a user message whose content mixes a text part and an `image_url` part
//! carrying a base64 `data:` URL.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use vigil_models::TokenUsage;

use crate::config::ChatEndpointConfig;
use crate::error::{parse_retry_after, VisionError, VisionResult};
use crate::frame::EncodedImage;
use crate::metrics::{record_request, record_tokens};
use crate::provider::{Completion, GenerationParams, VisionProvider};

pub struct ChatCompletionsProvider {
    config: ChatEndpointConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    total_tokens: Option<u64>,
}

impl ChatCompletionsProvider {
    pub fn new(config: ChatEndpointConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl VisionProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.config.name
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
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image.data_url() },
                    },
                ],
            }],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };

        let start = Instant::now();
        let response = match self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                record_request(self.name(), 0, start.elapsed().as_secs_f64() * 1000.0);
                return Err(VisionError::request_failed(format!(
                    "{} request failed: {}",
                    self.config.name, e
                )));
            }
        };

        let status = response.status();
        record_request(self.name(), status.as_u16(), start.elapsed().as_secs_f64() * 1000.0);

        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let error_text = response.text().await.unwrap_or_default();
            warn!(
                provider = %self.config.name,
                status = status.as_u16(),
                "Chat completions endpoint returned error"
            );
            return Err(VisionError::from_http_status(status.as_u16(), error_text, retry_after));
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            VisionError::invalid_response(format!(
                "Failed to parse {} response: {}",
                self.config.name, e
            ))
        })?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                VisionError::invalid_response(format!("No content in {} response", self.config.name))
            })?;

        let usage = body.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens.unwrap_or(u.prompt_tokens + u.completion_tokens),
        });
        if let Some(u) = usage {
            record_tokens(self.name(), u.prompt_tokens, u.completion_tokens);
        }

        let latency = start.elapsed();
        debug!(
            provider = %self.config.name,
            model = %self.config.model,
            latency_ms = latency.as_millis() as u64,
            "Chat completion received"
        );

        Ok(Completion { text, usage, latency })
    }
}
