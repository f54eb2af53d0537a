//! HTTP clients for hosted vision-language providers.
//!
//! Every provider accepts a prompt plus a single encoded frame and returns
//! free text with optional token usage:
//! - Google Gemini `generateContent`
//! - OpenAI-compatible chat completions (NVIDIA NIM, xAI)

pub mod chat;
pub mod config;
pub mod error;
pub mod frame;
pub mod gemini;
pub mod json;
pub mod metrics;
pub mod provider;

pub use chat::ChatCompletionsProvider;
pub use config::{ChatEndpointConfig, GeminiConfig, ProviderConfig};
pub use error::{VisionError, VisionResult};
pub use frame::EncodedImage;
pub use gemini::GeminiProvider;
pub use json::{extract_json_object, strip_code_fences};
pub use provider::{Completion, GenerationParams, VisionProvider};
