//! Pipeline configuration.

use std::str::FromStr;
use std::time::Duration;

use vigil_models::SpecialistProvider;

use crate::budget::BudgetConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::keywords::{DEFAULT_ANALYST_TERMS, DEFAULT_CRITICAL_TERMS};

/// Which hosted model backs the throttled analyst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalystBackend {
    Gemini,
    Xai,
}

impl FromStr for AnalystBackend {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(AnalystBackend::Gemini),
            "xai" | "grok" => Ok(AnalystBackend::Xai),
            other => Err(PipelineError::config_error(format!(
                "Unknown analyst backend: {}",
                other
            ))),
        }
    }
}

/// Pipeline configuration. Read once at construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Frame loop rate (layer 1)
    pub target_fps: f32,
    /// Presence threshold for the built-in motion model
    pub detection_threshold: f32,
    pub analyst_budget: BudgetConfig,
    pub specialist_budget: BudgetConfig,
    /// Fixed cadence that drives the analyst regardless of activity
    pub analysis_interval: Duration,
    /// How often the queue drain looks for pending work
    pub poll_interval: Duration,
    /// Penalty applied to the analyst budget after a provider error
    pub error_backoff: Duration,
    pub analyst_backend: AnalystBackend,
    pub analyst_keywords: Vec<String>,
    /// Subset of keywords that triggers auto-escalation
    pub critical_keywords: Vec<String>,
    /// Fallback order when no specialist provider is requested
    pub specialist_order: Vec<SpecialistProvider>,
    pub auto_escalate: bool,
    /// Provider requested by auto-escalation
    pub auto_provider: SpecialistProvider,
    pub jpeg_quality: u8,
    /// Sink write quota per second
    pub sink_writes_per_second: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_fps: 30.0,
            detection_threshold: 0.5,
            analyst_budget: BudgetConfig::ANALYST,
            specialist_budget: BudgetConfig::SPECIALIST,
            analysis_interval: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(10),
            analyst_backend: AnalystBackend::Gemini,
            analyst_keywords: to_strings(DEFAULT_ANALYST_TERMS),
            critical_keywords: to_strings(DEFAULT_CRITICAL_TERMS),
            specialist_order: vec![SpecialistProvider::Xai, SpecialistProvider::Nvidia],
            auto_escalate: true,
            auto_provider: SpecialistProvider::Nvidia,
            jpeg_quality: vigil_vision::frame::DEFAULT_JPEG_QUALITY,
            sink_writes_per_second: 5,
        }
    }
}

fn to_strings(terms: &[&str]) -> Vec<String> {
    terms.iter().map(|t| t.to_string()).collect()
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(key, default.as_millis() as u64))
}

/// Comma-separated list, lowercased. `None` when unset or blank.
fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn budget_from_env(prefix: &str, default: BudgetConfig) -> BudgetConfig {
    BudgetConfig {
        min_interval: env_millis(&format!("{}_MIN_INTERVAL_MS", prefix), default.min_interval),
        max_calls_per_window: env_or(
            &format!("{}_MAX_CALLS_PER_WINDOW", prefix),
            default.max_calls_per_window,
        ),
        window: env_millis(&format!("{}_WINDOW_MS", prefix), default.window),
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> PipelineResult<Self> {
        let defaults = Self::default();

        let analyst_backend = match std::env::var("ANALYST_PROVIDER") {
            Ok(v) if !v.trim().is_empty() => v.parse()?,
            _ => defaults.analyst_backend,
        };

        let specialist_order = match env_list("SPECIALIST_PROVIDER_ORDER") {
            Some(items) => items
                .iter()
                .map(|s| s.parse::<SpecialistProvider>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| PipelineError::config_error(e.to_string()))?,
            None => defaults.specialist_order,
        };

        let auto_provider = match std::env::var("AUTO_ESCALATION_PROVIDER") {
            Ok(v) if !v.trim().is_empty() => v
                .parse()
                .map_err(|e: vigil_models::SpecialistProviderParseError| {
                    PipelineError::config_error(e.to_string())
                })?,
            _ => defaults.auto_provider,
        };

        let config = Self {
            target_fps: env_or("VIGIL_TARGET_FPS", defaults.target_fps),
            detection_threshold: env_or("DETECTION_THRESHOLD", defaults.detection_threshold)
                .clamp(0.0, 1.0),
            analyst_budget: budget_from_env("ANALYST", defaults.analyst_budget),
            specialist_budget: budget_from_env("SPECIALIST", defaults.specialist_budget),
            analysis_interval: Duration::from_secs(env_or(
                "ANALYSIS_INTERVAL_SECS",
                defaults.analysis_interval.as_secs(),
            )),
            poll_interval: env_millis("QUEUE_POLL_INTERVAL_MS", defaults.poll_interval),
            error_backoff: env_millis("ANALYST_ERROR_BACKOFF_MS", defaults.error_backoff),
            analyst_backend,
            analyst_keywords: env_list("ANALYST_KEYWORDS").unwrap_or(defaults.analyst_keywords),
            critical_keywords: env_list("CRITICAL_KEYWORDS").unwrap_or(defaults.critical_keywords),
            specialist_order,
            auto_escalate: env_or("AUTO_ESCALATION_ENABLED", defaults.auto_escalate),
            auto_provider,
            jpeg_quality: env_or("FRAME_JPEG_QUALITY", defaults.jpeg_quality),
            sink_writes_per_second: env_or("SINK_WRITES_PER_SEC", defaults.sink_writes_per_second),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> PipelineResult<()> {
        if !(self.target_fps.is_finite() && self.target_fps > 0.0) {
            return Err(PipelineError::config_error("target_fps must be positive"));
        }
        if self.frame_interval().is_zero() {
            return Err(PipelineError::config_error(format!(
                "target_fps {} is too high for the frame clock",
                self.target_fps
            )));
        }
        if self.analyst_budget.max_calls_per_window == 0
            || self.specialist_budget.max_calls_per_window == 0
        {
            return Err(PipelineError::config_error(
                "max_calls_per_window must be at least 1",
            ));
        }
        if self.analysis_interval.is_zero() || self.poll_interval.is_zero() {
            return Err(PipelineError::config_error(
                "analysis and poll intervals must be non-zero",
            ));
        }
        if self.specialist_order.is_empty() {
            return Err(PipelineError::config_error(
                "specialist provider order cannot be empty",
            ));
        }
        Ok(())
    }

    /// Per-frame processing budget.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps as f64)
    }
}
