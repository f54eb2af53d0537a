//! Layer 3: the specialist escalator.
//!
//! Single-flight per instance: a second request while one is unresolved is
//! rejected with `AlreadyInProgress`, never queued. Admission (`begin`) is
//! synchronous so callers can surface rejections before spawning work.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};
use vigil_models::{
    BudgetSnapshot, DetectionContext, EscalationTrigger, SpecialistProvider, SpecialistResult,
};
use vigil_vision::{extract_json_object, strip_code_fences, EncodedImage, GenerationParams, VisionProvider};

use crate::budget::{BudgetConfig, CallBudget};
use crate::error::SpecialistError;
use crate::flight::FlightGuard;
use crate::keywords::{
    extract_entities, intersects_critical, mine_recommendations, mine_threats,
    DEFAULT_CRITICAL_TERMS, MAX_MINED_SENTENCES,
};
use crate::metrics::record_specialist_outcome;

/// Sampling parameters per provider.
pub fn provider_params(provider: SpecialistProvider) -> GenerationParams {
    match provider {
        SpecialistProvider::Nvidia => GenerationParams {
            max_tokens: 300,
            temperature: 0.3,
        },
        SpecialistProvider::Xai => GenerationParams {
            max_tokens: 350,
            temperature: 0.3,
        },
    }
}

/// Confidence reported when the response carries none.
pub fn default_confidence(provider: SpecialistProvider) -> f32 {
    match provider {
        SpecialistProvider::Nvidia => 0.9,
        SpecialistProvider::Xai => 0.95,
    }
}

pub struct SpecialistEscalator {
    /// Configured providers in fallback order
    providers: Vec<(SpecialistProvider, Arc<dyn VisionProvider>)>,
    budget: Arc<Mutex<CallBudget>>,
    in_flight: Arc<AtomicBool>,
    critical: Vec<String>,
}

impl SpecialistEscalator {
    /// `order` ranks the configured providers for fallback selection.
    pub fn new(
        mut providers: Vec<(SpecialistProvider, Arc<dyn VisionProvider>)>,
        order: &[SpecialistProvider],
        budget: BudgetConfig,
    ) -> Self {
        providers.sort_by_key(|(kind, _)| {
            order.iter().position(|o| o == kind).unwrap_or(usize::MAX)
        });
        Self {
            providers,
            budget: Arc::new(Mutex::new(CallBudget::new(budget))),
            in_flight: Arc::new(AtomicBool::new(false)),
            critical: DEFAULT_CRITICAL_TERMS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Escalator with no providers.
    pub fn unavailable() -> Self {
        Self::new(Vec::new(), &[], BudgetConfig::SPECIALIST)
    }

    pub fn with_critical_keywords(mut self, critical: Vec<String>) -> Self {
        self.critical = critical.into_iter().map(|k| k.to_lowercase()).collect();
        self
    }

    /// True iff at least one provider has credentials.
    pub fn is_available(&self) -> bool {
        !self.providers.is_empty()
    }

    pub fn providers(&self) -> Vec<SpecialistProvider> {
        self.providers.iter().map(|(kind, _)| *kind).collect()
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn budget_snapshot(&self) -> BudgetSnapshot {
        self.budget.lock().snapshot(Instant::now())
    }

    pub fn reset(&self) {
        let mut budget = self.budget.lock();
        let config = *budget.config();
        *budget = CallBudget::new(config);
    }

    /// Stateless check against the critical keyword subset.
    pub fn should_auto_trigger(&self, keywords: &BTreeSet<String>) -> bool {
        intersects_critical(keywords, &self.critical)
    }

    fn select(
        &self,
        preferred: Option<SpecialistProvider>,
    ) -> Option<&(SpecialistProvider, Arc<dyn VisionProvider>)> {
        preferred
            .and_then(|p| self.providers.iter().find(|(kind, _)| *kind == p))
            .or_else(|| self.providers.first())
    }

    /// Admit one escalation or reject it synchronously.
    pub fn begin(
        &self,
        preferred: Option<SpecialistProvider>,
    ) -> Result<Escalation, SpecialistError> {
        let (kind, client) = self.select(preferred).ok_or(SpecialistError::Unavailable)?;
        let guard =
            FlightGuard::try_acquire(&self.in_flight).ok_or(SpecialistError::AlreadyInProgress)?;

        {
            let mut budget = self.budget.lock();
            let now = Instant::now();
            if !budget.can_call(now) {
                return Err(SpecialistError::RateLimited {
                    retry_after: budget.time_until_next_call(now),
                });
            }
        }

        Ok(Escalation {
            provider: *kind,
            client: Arc::clone(client),
            budget: Arc::clone(&self.budget),
            _guard: guard,
        })
    }

    /// Admit and run in one step.
    pub async fn analyze(
        &self,
        image: &EncodedImage,
        preferred: Option<SpecialistProvider>,
        context: Option<DetectionContext>,
        trigger: EscalationTrigger,
    ) -> Result<SpecialistResult, SpecialistError> {
        self.begin(preferred)?.run(image, context, trigger).await
    }
}

/// An admitted escalation. Holds the single-flight slot until dropped.
pub struct Escalation {
    provider: SpecialistProvider,
    client: Arc<dyn VisionProvider>,
    budget: Arc<Mutex<CallBudget>>,
    _guard: FlightGuard,
}

impl Escalation {
    pub fn provider(&self) -> SpecialistProvider {
        self.provider
    }

    pub async fn run(
        self,
        image: &EncodedImage,
        context: Option<DetectionContext>,
        trigger: EscalationTrigger,
    ) -> Result<SpecialistResult, SpecialistError> {
        let prompt = build_prompt(context.as_ref());
        let params = provider_params(self.provider);

        let completion = match self.client.describe(&prompt, image, &params).await {
            Ok(c) => c,
            Err(e) => {
                if let Some(retry_after) = e.retry_after() {
                    self.budget.lock().penalize(Instant::now(), retry_after);
                }
                record_specialist_outcome(self.provider.as_str(), "error");
                warn!(provider = %self.provider, trigger = trigger.as_str(), error = %e, "Specialist call failed");
                return Err(SpecialistError::Provider(e));
            }
        };
        self.budget.lock().record_call(Instant::now());

        let parsed = parse_response(self.provider, &completion.text);
        record_specialist_outcome(self.provider.as_str(), "ok");
        info!(
            provider = %self.provider,
            trigger = trigger.as_str(),
            threats = parsed.threats.len(),
            recommendations = parsed.recommendations.len(),
            latency_ms = completion.latency.as_millis() as u64,
            "Specialist analysis complete"
        );

        Ok(SpecialistResult {
            provider: self.provider,
            narrative: parsed.narrative,
            confidence: parsed.confidence,
            detected_entities: parsed.detected_entities,
            threats: parsed.threats,
            recommendations: parsed.recommendations,
            produced_at: Utc::now(),
            trigger,
            usage: completion.usage,
            latency_ms: Some(completion.latency.as_millis() as u64),
        })
    }
}

fn build_prompt(context: Option<&DetectionContext>) -> String {
    let mut prompt = String::from(
        "You are a crowd-safety specialist reviewing a camera frame from a live event. \
         Assess crowd density, hazards and any immediate risks to people.",
    );
    if let Some(ctx) = context {
        prompt.push_str(&format!(
            " Local detection counted {} subject(s) at {}% confidence.",
            ctx.subject_count,
            ctx.confidence_percent()
        ));
    }
    prompt.push_str(
        " Respond with a JSON object with keys \"analysis\" (string), \"threats\" (array of strings), \
         \"recommendations\" (array of strings), \"detectedObjects\" (array of strings) and \
         \"confidence\" (number between 0 and 1).",
    );
    prompt
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedResponse {
    pub narrative: String,
    pub confidence: f32,
    pub detected_entities: Vec<String>,
    pub threats: Vec<String>,
    pub recommendations: Vec<String>,
}

fn string_list(obj: &Value, keys: &[&str]) -> Option<Vec<String>> {
    keys.iter().find_map(|k| obj.get(*k)).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

/// Structured JSON when the model complied, heuristic mining otherwise.
pub(crate) fn parse_response(provider: SpecialistProvider, text: &str) -> ParsedResponse {
    if let Some(obj) = extract_json_object(text) {
        let narrative = ["analysis", "narrative", "description"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if let Some(narrative) = narrative {
            let confidence = obj
                .get("confidence")
                .and_then(Value::as_f64)
                .map(|c| (c as f32).clamp(0.0, 1.0))
                .unwrap_or_else(|| default_confidence(provider));
            let mut threats =
                string_list(&obj, &["threats"]).unwrap_or_else(|| mine_threats(&narrative));
            let mut recommendations = string_list(&obj, &["recommendations"])
                .unwrap_or_else(|| mine_recommendations(&narrative));
            threats.truncate(MAX_MINED_SENTENCES);
            recommendations.truncate(MAX_MINED_SENTENCES);
            let detected_entities = string_list(&obj, &["detectedObjects", "detected_entities"])
                .unwrap_or_else(|| extract_entities(&narrative));

            return ParsedResponse {
                narrative,
                confidence,
                detected_entities,
                threats,
                recommendations,
            };
        }
    }

    let narrative = strip_code_fences(text).trim().to_string();
    ParsedResponse {
        confidence: default_confidence(provider),
        detected_entities: extract_entities(&narrative),
        threats: mine_threats(&narrative),
        recommendations: mine_recommendations(&narrative),
        narrative,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_image, MockProvider};
    use std::time::Duration;
    use vigil_vision::VisionError;

    fn escalator(providers: Vec<(SpecialistProvider, Arc<MockProvider>)>) -> SpecialistEscalator {
        SpecialistEscalator::new(
            providers
                .into_iter()
                .map(|(k, p)| (k, p as Arc<dyn VisionProvider>))
                .collect(),
            &[SpecialistProvider::Xai, SpecialistProvider::Nvidia],
            BudgetConfig::SPECIALIST,
        )
    }

    #[test]
    fn test_unavailable_without_providers() {
        let escalator = SpecialistEscalator::unavailable();
        assert!(!escalator.is_available());
        assert!(matches!(escalator.begin(None), Err(SpecialistError::Unavailable)));
    }

    #[test]
    fn test_fallback_follows_policy_order() {
        let nvidia = MockProvider::new("nvidia", "ok").arc();
        let xai = MockProvider::new("xai", "ok").arc();
        let escalator = escalator(vec![
            (SpecialistProvider::Nvidia, nvidia),
            (SpecialistProvider::Xai, xai),
        ]);
        assert_eq!(escalator.providers(), vec![SpecialistProvider::Xai, SpecialistProvider::Nvidia]);
        assert_eq!(escalator.begin(None).unwrap().provider(), SpecialistProvider::Xai);
        assert_eq!(
            escalator.begin(Some(SpecialistProvider::Nvidia)).unwrap().provider(),
            SpecialistProvider::Nvidia
        );
    }

    #[test]
    fn test_unconfigured_preference_falls_back() {
        let nvidia = MockProvider::new("nvidia", "ok").arc();
        let escalator = escalator(vec![(SpecialistProvider::Nvidia, nvidia)]);
        assert_eq!(
            escalator.begin(Some(SpecialistProvider::Xai)).unwrap().provider(),
            SpecialistProvider::Nvidia
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight() {
        let nvidia = MockProvider::new("nvidia", "Crowd is calm.")
            .with_delay(Duration::from_secs(3))
            .arc();
        let escalator = escalator(vec![(SpecialistProvider::Nvidia, nvidia.clone())]);
        let image = test_image();

        let (a, b) = tokio::join!(
            escalator.analyze(&image, None, None, EscalationTrigger::Manual),
            escalator.analyze(&image, None, None, EscalationTrigger::Manual),
        );

        let outcomes = [a.is_ok(), b.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        let rejected = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(rejected, SpecialistError::AlreadyInProgress));
        assert_eq!(nvidia.calls(), 1);
        assert!(!escalator.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_rejects_rapid_escalations() {
        let nvidia = MockProvider::new("nvidia", "Crowd is calm.").arc();
        let escalator = escalator(vec![(SpecialistProvider::Nvidia, nvidia.clone())]);
        let image = test_image();

        escalator
            .analyze(&image, None, None, EscalationTrigger::Manual)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        let err = escalator
            .analyze(&image, None, None, EscalationTrigger::Manual)
            .await
            .unwrap_err();
        match err {
            SpecialistError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(15))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(nvidia.calls(), 1);
        assert!(!escalator.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_error_releases_slot() {
        let xai = MockProvider::new("xai", "Crowd is calm.").arc();
        xai.push_error(VisionError::request_failed("timeout"));
        let escalator = escalator(vec![(SpecialistProvider::Xai, xai)]);

        let err = escalator
            .analyze(&test_image(), None, None, EscalationTrigger::Auto)
            .await
            .unwrap_err();
        assert!(matches!(err, SpecialistError::Provider(_)));
        assert!(!escalator.is_processing());
        assert_eq!(escalator.budget_snapshot().total_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_fields_from_json() {
        let xai = MockProvider::new(
            "xai",
            "Here is my assessment:\n```json\n{\"analysis\": \"Dense crowd at gate B.\", \
             \"threats\": [\"Crush risk at gate B\"], \"recommendations\": [\"Open gate C\"], \
             \"detectedObjects\": [\"crowd\", \"barrier\"], \"confidence\": 0.82}\n```",
        )
        .arc();
        let escalator = escalator(vec![(SpecialistProvider::Xai, xai.clone())]);
        let ctx = DetectionContext {
            subject_count: 14,
            confidence: 0.9,
            has_activity: true,
        };

        let result = escalator
            .analyze(&test_image(), None, Some(ctx), EscalationTrigger::Manual)
            .await
            .unwrap();
        assert_eq!(result.provider, SpecialistProvider::Xai);
        assert_eq!(result.narrative, "Dense crowd at gate B.");
        assert_eq!(result.threats, vec!["Crush risk at gate B"]);
        assert_eq!(result.recommendations, vec!["Open gate C"]);
        assert_eq!(result.detected_entities, vec!["crowd", "barrier"]);
        assert!((result.confidence - 0.82).abs() < 1e-6);
        assert_eq!(result.trigger, EscalationTrigger::Manual);
        assert!(xai.last_prompt().unwrap().contains("14 subject(s)"));
    }

    #[test]
    fn test_prose_response_is_mined() {
        let parsed = parse_response(
            SpecialistProvider::Nvidia,
            "The crowd near the stage is dense. There is a fire hazard by the exit. \
             Stewards should clear the exit path.",
        );
        assert_eq!(parsed.confidence, 0.9);
        assert_eq!(parsed.threats, vec!["There is a fire hazard by the exit"]);
        assert_eq!(parsed.recommendations, vec!["Stewards should clear the exit path"]);
        assert_eq!(parsed.detected_entities, vec!["crowd", "fire", "exit"]);
    }

    #[test]
    fn test_json_without_narrative_falls_back_to_text() {
        let parsed = parse_response(SpecialistProvider::Xai, "{\"threats\": []} Danger near door.");
        assert_eq!(parsed.confidence, 0.95);
        assert!(parsed.narrative.contains("Danger near door"));
    }

    #[test]
    fn test_should_auto_trigger() {
        let escalator = SpecialistEscalator::unavailable();
        let weapon: BTreeSet<String> = ["weapon".to_string()].into();
        let benign: BTreeSet<String> = ["medical".to_string(), "alert".to_string()].into();
        assert!(escalator.should_auto_trigger(&weapon));
        assert!(!escalator.should_auto_trigger(&benign));

        let custom = SpecialistEscalator::unavailable().with_critical_keywords(vec!["Medical".into()]);
        assert!(custom.should_auto_trigger(&benign));
    }
}
