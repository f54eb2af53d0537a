//! Layer 3 (specialist escalation) results.
//!
//! Specialist providers are expensive, low-frequency vision models used for
//! deep analysis:
//!
//! - `Nvidia`: NVIDIA NIM hosted vision model
//! - `Xai`: xAI Grok vision model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::TokenUsage;

/// High-cost vision provider used for escalations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistProvider {
    Nvidia,
    Xai,
}

impl SpecialistProvider {
    /// All known specialist providers.
    pub const ALL: &'static [SpecialistProvider] = &[SpecialistProvider::Nvidia, SpecialistProvider::Xai];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialistProvider::Nvidia => "nvidia",
            SpecialistProvider::Xai => "xai",
        }
    }
}

impl fmt::Display for SpecialistProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SpecialistProvider {
    type Err = SpecialistProviderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nvidia" | "nim" => Ok(SpecialistProvider::Nvidia),
            "xai" | "grok" => Ok(SpecialistProvider::Xai),
            _ => Err(SpecialistProviderParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown specialist provider: {0}")]
pub struct SpecialistProviderParseError(String);

/// Who initiated an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    Manual,
    Auto,
}

impl EscalationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationTrigger::Manual => "manual",
            EscalationTrigger::Auto => "auto",
        }
    }
}

/// Structured output of a specialist escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpecialistResult {
    pub provider: SpecialistProvider,
    pub narrative: String,
    pub confidence: f32,
    pub detected_entities: Vec<String>,
    pub threats: Vec<String>,
    pub recommendations: Vec<String>,
    pub produced_at: DateTime<Utc>,
    pub trigger: EscalationTrigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("nvidia".parse::<SpecialistProvider>().unwrap(), SpecialistProvider::Nvidia);
        assert_eq!("GROK".parse::<SpecialistProvider>().unwrap(), SpecialistProvider::Xai);
        assert_eq!(" xai ".parse::<SpecialistProvider>().unwrap(), SpecialistProvider::Xai);
        assert!("openai".parse::<SpecialistProvider>().is_err());
    }

    #[test]
    fn test_provider_roundtrip_display() {
        for provider in SpecialistProvider::ALL {
            assert_eq!(provider.to_string().parse::<SpecialistProvider>().unwrap(), *provider);
        }
    }

    #[test]
    fn test_trigger_serialization() {
        assert_eq!(serde_json::to_string(&EscalationTrigger::Auto).unwrap(), "\"auto\"");
    }
}
