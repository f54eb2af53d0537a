//! Provider configuration.
//!
//! Credentials are read once from the environment; a provider with no key
//! is simply absent.

use std::sync::Arc;
use std::time::Duration;

use vigil_models::SpecialistProvider;

use crate::chat::ChatCompletionsProvider;
use crate::error::VisionResult;
use crate::gemini::GeminiProvider;
use crate::provider::VisionProvider;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_NVIDIA_ENDPOINT: &str =
    "https://ai.api.nvidia.com/v1/gr/meta/llama-3.2-neva-22b/chat/completions";
pub const DEFAULT_NVIDIA_MODEL: &str = "meta/llama-3.2-neva-22b";
pub const DEFAULT_XAI_ENDPOINT: &str = "https://api.x.ai/v1/chat/completions";
pub const DEFAULT_XAI_MODEL: &str = "grok-vision-beta";

/// Gemini `generateContent` settings.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

/// An OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatEndpointConfig {
    pub name: String,
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
}

/// Credentials and HTTP settings for every provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub gemini: Option<GeminiConfig>,
    pub nvidia: Option<ChatEndpointConfig>,
    pub xai: Option<ChatEndpointConfig>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            gemini: None,
            nvidia: None,
            xai: None,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl ProviderConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let gemini = non_empty_env("GEMINI_API_KEY").map(|api_key| GeminiConfig {
            api_key,
            model: non_empty_env("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            base_url: non_empty_env("GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
        });

        let nvidia = non_empty_env("NVIDIA_API_KEY").map(|api_key| ChatEndpointConfig {
            name: SpecialistProvider::Nvidia.as_str().to_string(),
            api_key,
            model: non_empty_env("NVIDIA_MODEL").unwrap_or_else(|| DEFAULT_NVIDIA_MODEL.to_string()),
            endpoint: non_empty_env("NVIDIA_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_NVIDIA_ENDPOINT.to_string()),
        });

        let xai = non_empty_env("XAI_API_KEY").map(|api_key| ChatEndpointConfig {
            name: SpecialistProvider::Xai.as_str().to_string(),
            api_key,
            model: non_empty_env("XAI_MODEL").unwrap_or_else(|| DEFAULT_XAI_MODEL.to_string()),
            endpoint: non_empty_env("XAI_ENDPOINT").unwrap_or_else(|| DEFAULT_XAI_ENDPOINT.to_string()),
        });

        let request_timeout_secs: u64 = std::env::var("VISION_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Self {
            gemini,
            nvidia,
            xai,
            request_timeout: Duration::from_secs(request_timeout_secs),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Build an HTTP client with the configured timeouts.
    pub fn http_client(&self) -> VisionResult<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("vigil-vision/", env!("CARGO_PKG_VERSION")))
            .build()?)
    }

    /// Gemini provider, if a key is configured.
    pub fn gemini_provider(&self, client: &reqwest::Client) -> Option<Arc<dyn VisionProvider>> {
        self.gemini
            .clone()
            .map(|cfg| Arc::new(GeminiProvider::new(cfg, client.clone())) as Arc<dyn VisionProvider>)
    }

    /// Chat-completions provider for a specialist tier, if a key is configured.
    pub fn specialist_provider(
        &self,
        provider: SpecialistProvider,
        client: &reqwest::Client,
    ) -> Option<Arc<dyn VisionProvider>> {
        let cfg = match provider {
            SpecialistProvider::Nvidia => self.nvidia.clone(),
            SpecialistProvider::Xai => self.xai.clone(),
        };
        cfg.map(|cfg| {
            Arc::new(ChatCompletionsProvider::new(cfg, client.clone())) as Arc<dyn VisionProvider>
        })
    }
}
