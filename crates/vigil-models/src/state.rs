//! Aggregated pipeline state published to observers.

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::analysis::AnalystResult;
use crate::detection::DetectionSignal;
use crate::specialist::SpecialistResult;

/// Description shown before the first analyst result arrives.
pub const INITIAL_DESCRIPTION: &str = "Initializing AI analysis...";

/// Description set when the pipeline is stopped.
pub const STOPPED_DESCRIPTION: &str = "Analysis stopped.";

/// Serializable view of a call budget at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BudgetSnapshot {
    pub calls_in_window: u32,
    pub max_calls_per_window: u32,
    pub total_calls: u64,
    pub time_until_next_call_ms: u64,
}

/// Layer 2 portion of the state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalystView {
    /// Always present; falls back to the placeholder or the cached description.
    pub description: String,
    pub keywords: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<AnalystResult>,
    pub next_update_in_ms: u64,
    pub available: bool,
    pub budget: BudgetSnapshot,
}

impl Default for AnalystView {
    fn default() -> Self {
        Self {
            description: INITIAL_DESCRIPTION.to_string(),
            keywords: BTreeSet::new(),
            latest: None,
            next_update_in_ms: 0,
            available: false,
            budget: BudgetSnapshot::default(),
        }
    }
}

/// Layer 3 portion of the state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpecialistView {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<SpecialistResult>,
    pub is_processing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub available: bool,
    pub budget: BudgetSnapshot,
}

/// Cumulative counters for a pipeline session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub analyst_calls_made: u64,
    pub specialist_calls_made: u64,
    pub auto_escalations_triggered: u64,
    /// Critical analyst results that did not reach the specialist
    #[serde(default)]
    pub auto_escalations_skipped: u64,
    pub deadline_misses: u64,
    pub analyst_tokens: u64,
    pub specialist_tokens: u64,
}

/// Merged snapshot of all three layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineState {
    pub detection: DetectionSignal,
    pub detector_ready: bool,
    pub analyst: AnalystView,
    pub specialist: SpecialistView,
    pub stats: PipelineStats,
    pub running: bool,
}

impl PipelineState {
    /// True when the latest specialist result reports any threat.
    pub fn has_threats(&self) -> bool {
        self.specialist
            .latest
            .as_ref()
            .map(|r| !r.threats.is_empty())
            .unwrap_or(false)
    }
}
