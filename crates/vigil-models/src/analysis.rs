//! Layer 2 (throttled analyst) results.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Why an analyst result carries the description it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// Fresh provider output; keywords may trigger escalation.
    EscalationEligible,
    /// Budget exhausted, the cached description was returned.
    RateLimited,
    /// Provider failed, the cached description was returned.
    Error,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::EscalationEligible => "escalation_eligible",
            TriggerReason::RateLimited => "rate_limited",
            TriggerReason::Error => "error",
        }
    }

    /// True if the result came from a completed provider call.
    pub fn is_fresh(&self) -> bool {
        matches!(self, TriggerReason::EscalationEligible)
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Output of one throttled analyst invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalystResult {
    pub description: String,
    pub keywords: BTreeSet<String>,
    pub produced_at: DateTime<Utc>,
    pub frame_sequence_number: u64,
    pub trigger_reason: TriggerReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl AnalystResult {
    /// Result carrying a previously cached description.
    pub fn cached(description: impl Into<String>, frame_sequence_number: u64, reason: TriggerReason) -> Self {
        Self {
            description: description.into(),
            keywords: BTreeSet::new(),
            produced_at: Utc::now(),
            frame_sequence_number,
            trigger_reason: reason,
            usage: None,
            latency_ms: None,
        }
    }
}
