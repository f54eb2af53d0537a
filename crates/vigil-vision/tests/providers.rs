//! HTTP-level tests for the vision providers against a mock server.

use std::time::Duration;

use serde_json::json;
use vigil_vision::{
    ChatCompletionsProvider, ChatEndpointConfig, EncodedImage, GeminiConfig, GeminiProvider,
    GenerationParams, VisionError, VisionProvider,
};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn frame() -> EncodedImage {
    EncodedImage::from_jpeg_bytes(&[0xFF, 0xD8, 0xFF, 0xD9])
}

fn gemini(server: &MockServer) -> GeminiProvider {
    GeminiProvider::new(
        GeminiConfig {
            api_key: "test-key".to_string(),
            model: "gemini-test".to_string(),
            base_url: server.uri(),
        },
        reqwest::Client::new(),
    )
}

fn chat(server: &MockServer, name: &str) -> ChatCompletionsProvider {
    ChatCompletionsProvider::new(
        ChatEndpointConfig {
            name: name.to_string(),
            api_key: "secret".to_string(),
            model: "vision-model".to_string(),
            endpoint: format!("{}/v1/chat/completions", server.uri()),
        },
        reqwest::Client::new(),
    )
}

#[tokio::test]
async fn gemini_returns_text_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-test:generateContent"))
        .and(query_param("key", "test-key"))
        .and(body_partial_json(json!({
            "generationConfig": { "maxOutputTokens": 120 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": "  Two people walking.  " }] } }],
            "usageMetadata": { "promptTokenCount": 250, "candidatesTokenCount": 8, "totalTokenCount": 258 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let params = GenerationParams { max_tokens: 120, temperature: 0.4 };
    let completion = gemini(&server).describe("Describe", &frame(), &params).await.unwrap();

    assert_eq!(completion.text, "Two people walking.");
    let usage = completion.usage.unwrap();
    assert_eq!(usage.prompt_tokens, 250);
    assert_eq!(usage.total_tokens, 258);
}

#[tokio::test]
async fn gemini_429_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "15"))
        .expect(1)
        .mount(&server)
        .await;

    let err = gemini(&server)
        .describe("Describe", &frame(), &GenerationParams::default())
        .await
        .unwrap_err();

    assert!(err.is_rate_limited());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(15)));
}

#[tokio::test]
async fn gemini_empty_candidates_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
        .mount(&server)
        .await;

    let err = gemini(&server)
        .describe("Describe", &frame(), &GenerationParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, VisionError::InvalidResponse(_)));
}

#[tokio::test]
async fn chat_sends_bearer_and_data_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({
            "model": "vision-model",
            "max_tokens": 300
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "A crowd near the exit." } }],
            "usage": { "prompt_tokens": 400, "completion_tokens": 20 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = chat(&server, "xai");
    let completion = provider
        .describe("Analyze", &frame(), &GenerationParams::default())
        .await
        .unwrap();

    assert_eq!(provider.name(), "xai");
    assert_eq!(completion.text, "A crowd near the exit.");
    assert_eq!(completion.usage.unwrap().total_tokens, 420);

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let parts = &body["messages"][0]["content"];
    assert_eq!(parts[0]["type"], "text");
    assert_eq!(parts[1]["type"], "image_url");
    assert!(parts[1]["image_url"]["url"]
        .as_str()
        .unwrap()
        .starts_with("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn chat_server_error_is_retryable_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = chat(&server, "nvidia")
        .describe("Analyze", &frame(), &GenerationParams::default())
        .await
        .unwrap_err();

    assert_eq!(err.http_status(), Some(503));
    assert!(err.is_retryable());
    assert!(!err.is_rate_limited());
}
