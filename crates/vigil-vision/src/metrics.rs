//! Provider metrics.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total provider requests by provider and status.
    pub const REQUESTS_TOTAL: &str = "vision_provider_requests_total";

    /// Request latency in seconds by provider.
    pub const LATENCY_SECONDS: &str = "vision_provider_latency_seconds";

    /// Tokens consumed by provider and kind (prompt/completion).
    pub const TOKENS_TOTAL: &str = "vision_provider_tokens_total";
}

/// Record metrics for a completed provider request.
///
/// `status` is 0 when no HTTP response was received.
pub fn record_request(provider: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "provider" => provider.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "provider" => provider.to_string()
    )
    .record(latency_ms / 1000.0);
}

/// Record token usage reported by a provider.
pub fn record_tokens(provider: &str, prompt: u64, completion: u64) {
    counter!(names::TOKENS_TOTAL, "provider" => provider.to_string(), "kind" => "prompt")
        .increment(prompt);
    counter!(names::TOKENS_TOTAL, "provider" => provider.to_string(), "kind" => "completion")
        .increment(completion);
}
