//! Shared data models for the Vigil analysis pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Per-frame detection signals (layer 1)
//! - Throttled analyst results (layer 2)
//! - Specialist escalation results (layer 3)
//! - The aggregated pipeline state published to subscribers
//! - Records handed to the persistence sink

pub mod analysis;
pub mod detection;
pub mod record;
pub mod specialist;
pub mod state;

// Re-export common types
pub use analysis::{AnalystResult, TokenUsage, TriggerReason};
pub use detection::{DetectionContext, DetectionSignal, Landmark};
pub use record::{AnalysisRecord, SessionId};
pub use specialist::{
    EscalationTrigger, SpecialistProvider, SpecialistProviderParseError, SpecialistResult,
};
pub use state::{
    AnalystView, BudgetSnapshot, PipelineState, PipelineStats, SpecialistView, INITIAL_DESCRIPTION,
    STOPPED_DESCRIPTION,
};
