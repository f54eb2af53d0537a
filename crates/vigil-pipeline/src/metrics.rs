//! Pipeline metrics.

use metrics::{counter, gauge};

/// Metric name constants for consistency.
pub mod names {
    /// Frames run through the local detector.
    pub const FRAMES_TOTAL: &str = "vigil_frames_processed_total";

    /// Detector runs that exceeded the per-frame budget.
    pub const DEADLINE_MISSES_TOTAL: &str = "vigil_detector_deadline_misses_total";

    /// Analyst invocations by outcome (escalation_eligible, rate_limited, error).
    pub const ANALYST_OUTCOMES_TOTAL: &str = "vigil_analyst_outcomes_total";

    /// Specialist invocations by provider and outcome.
    pub const SPECIALIST_OUTCOMES_TOTAL: &str = "vigil_specialist_outcomes_total";

    /// Automatic escalations started.
    pub const AUTO_ESCALATIONS_TOTAL: &str = "vigil_auto_escalations_total";

    /// Automatic escalations refused by the specialist, by reason.
    pub const AUTO_ESCALATIONS_SKIPPED_TOTAL: &str = "vigil_auto_escalations_skipped_total";

    /// Sink writes by kind and outcome.
    pub const SINK_WRITES_TOTAL: &str = "vigil_sink_writes_total";

    /// 1 while a pipeline is running.
    pub const PIPELINE_RUNNING: &str = "vigil_pipeline_running";
}

pub fn record_frame() {
    counter!(names::FRAMES_TOTAL).increment(1);
}

pub fn record_deadline_miss() {
    counter!(names::DEADLINE_MISSES_TOTAL).increment(1);
}

pub fn record_analyst_outcome(outcome: &'static str) {
    counter!(names::ANALYST_OUTCOMES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_specialist_outcome(provider: &str, outcome: &'static str) {
    counter!(
        names::SPECIALIST_OUTCOMES_TOTAL,
        "provider" => provider.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_auto_escalation() {
    counter!(names::AUTO_ESCALATIONS_TOTAL).increment(1);
}

pub fn record_auto_escalation_skipped(reason: &'static str) {
    counter!(names::AUTO_ESCALATIONS_SKIPPED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_sink_write(kind: &'static str, outcome: &'static str) {
    counter!(names::SINK_WRITES_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn set_running(running: bool) {
    gauge!(names::PIPELINE_RUNNING).set(if running { 1.0 } else { 0.0 });
}
