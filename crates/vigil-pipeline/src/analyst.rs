//! Layer 2: the throttled analyst.
//!
//! Wraps one vision provider behind a [`CallBudget`]. Never blocks and never
//! queues: when the budget disallows a call the cached description comes
//! back tagged `RateLimited`. Provider failures come back tagged `Error` and
//! push the next permitted call into the future.
//!
//! `reset()` starts a new epoch. A call still running from an earlier epoch
//! neither counts against the fresh budget nor replaces the cached text.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vigil_models::{AnalystResult, BudgetSnapshot, DetectionContext, TriggerReason, INITIAL_DESCRIPTION};
use vigil_vision::{EncodedImage, GenerationParams, VisionProvider};

use crate::budget::{BudgetConfig, CallBudget};
use crate::flight::FlightGuard;
use crate::keywords::{KeywordStrategy, SubstringKeywords};
use crate::metrics::record_analyst_outcome;

/// Sampling parameters for analyst calls.
pub const ANALYST_PARAMS: GenerationParams = GenerationParams {
    max_tokens: 256,
    temperature: 0.4,
};

pub struct ThrottledAnalyst {
    provider: Option<Arc<dyn VisionProvider>>,
    budget: Mutex<CallBudget>,
    cached: Mutex<String>,
    keywords: Arc<dyn KeywordStrategy>,
    error_backoff: Duration,
    params: GenerationParams,
    /// Replaced on reset so a stale call cannot block the new epoch
    in_flight: Mutex<Arc<AtomicBool>>,
    epoch: AtomicU64,
}

impl ThrottledAnalyst {
    pub fn new(provider: Option<Arc<dyn VisionProvider>>, budget: BudgetConfig) -> Self {
        Self {
            provider,
            budget: Mutex::new(CallBudget::new(budget)),
            cached: Mutex::new(INITIAL_DESCRIPTION.to_string()),
            keywords: Arc::new(SubstringKeywords::default()),
            error_backoff: Duration::from_secs(10),
            params: ANALYST_PARAMS,
            in_flight: Mutex::new(Arc::new(AtomicBool::new(false))),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn with_keywords(mut self, strategy: Arc<dyn KeywordStrategy>) -> Self {
        self.keywords = strategy;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider.as_ref().map(|p| p.name())
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.lock().load(Ordering::Acquire)
    }

    pub fn can_call_now(&self) -> bool {
        self.budget.lock().can_call(Instant::now())
    }

    pub fn time_until_next_call(&self) -> Duration {
        self.budget.lock().time_until_next_call(Instant::now())
    }

    pub fn budget_snapshot(&self) -> BudgetSnapshot {
        self.budget.lock().snapshot(Instant::now())
    }

    pub fn cached_description(&self) -> String {
        self.cached.lock().clone()
    }

    /// Fresh budget and placeholder description for a new session.
    pub fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.in_flight.lock() = Arc::new(AtomicBool::new(false));
        let config = *self.budget.lock().config();
        *self.budget.lock() = CallBudget::new(config);
        *self.cached.lock() = INITIAL_DESCRIPTION.to_string();
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn cached_result(&self, frame_seq: u64, reason: TriggerReason) -> AnalystResult {
        record_analyst_outcome(reason.as_str());
        AnalystResult::cached(self.cached_description(), frame_seq, reason)
    }

    /// Describe one frame. Exactly one provider call when permitted, none otherwise.
    pub async fn analyze(
        &self,
        image: &EncodedImage,
        frame_seq: u64,
        context: DetectionContext,
    ) -> AnalystResult {
        let Some(provider) = self.provider.as_ref() else {
            return self.cached_result(frame_seq, TriggerReason::Error);
        };

        let epoch = self.epoch.load(Ordering::SeqCst);
        if !self.budget.lock().can_call(Instant::now()) {
            debug!(frame_seq, "Analyst call skipped by budget");
            return self.cached_result(frame_seq, TriggerReason::RateLimited);
        }
        let flag = self.in_flight.lock().clone();
        let Some(_guard) = FlightGuard::try_acquire(&flag) else {
            return self.cached_result(frame_seq, TriggerReason::RateLimited);
        };

        let prompt = build_prompt(&context);
        match provider.describe(&prompt, image, &self.params).await {
            Ok(completion) => {
                let description = completion.text.trim().to_string();
                if self.is_current(epoch) {
                    self.budget.lock().record_call(Instant::now());
                    *self.cached.lock() = description.clone();
                } else {
                    debug!(frame_seq, "Analyst call finished after reset, not recorded");
                }
                let keywords = self.keywords.extract(&description);

                info!(
                    provider = provider.name(),
                    frame_seq,
                    latency_ms = completion.latency.as_millis() as u64,
                    keywords = ?keywords,
                    "Analyst description updated"
                );
                record_analyst_outcome(TriggerReason::EscalationEligible.as_str());

                AnalystResult {
                    description,
                    keywords,
                    produced_at: Utc::now(),
                    frame_sequence_number: frame_seq,
                    trigger_reason: TriggerReason::EscalationEligible,
                    usage: completion.usage,
                    latency_ms: Some(completion.latency.as_millis() as u64),
                }
            }
            Err(e) => {
                let penalty = e
                    .retry_after()
                    .map_or(self.error_backoff, |ra| ra.max(self.error_backoff));
                if self.is_current(epoch) {
                    self.budget.lock().penalize(Instant::now(), penalty);
                }
                warn!(
                    provider = provider.name(),
                    frame_seq,
                    error = %e,
                    penalty_ms = penalty.as_millis() as u64,
                    "Analyst call failed, backing off"
                );
                self.cached_result(frame_seq, TriggerReason::Error)
            }
        }
    }
}

fn build_prompt(context: &DetectionContext) -> String {
    let detection = if context.has_activity {
        format!(
            "Local detection reports {} subject(s) at {}% confidence.",
            context.subject_count,
            context.confidence_percent()
        )
    } else {
        "Local detection reports no notable movement.".to_string()
    };
    format!(
        "You are monitoring a crowd-safety camera at a live event. {} \
         Describe what is happening in one or two sentences. Mention any danger, \
         emergency, weapon, fire, fight, injured or suspicious person explicitly.",
        detection
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_image, MockProvider};
    use vigil_vision::VisionError;

    fn context() -> DetectionContext {
        DetectionContext {
            subject_count: 2,
            confidence: 0.87,
            has_activity: true,
        }
    }

    fn analyst(provider: Arc<MockProvider>) -> ThrottledAnalyst {
        ThrottledAnalyst::new(Some(provider), BudgetConfig::ANALYST)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_extracts_keywords_and_caches() {
        let provider = MockProvider::new("gemini", "A fight broke out near the bar; one person injured.").arc();
        let analyst = analyst(provider.clone());

        let result = analyst.analyze(&test_image(), 12, context()).await;
        assert_eq!(result.trigger_reason, TriggerReason::EscalationEligible);
        assert_eq!(result.frame_sequence_number, 12);
        assert!(result.keywords.contains("fight"));
        assert!(result.keywords.contains("injured"));
        assert_eq!(result.usage.unwrap().total_tokens, 120);
        assert_eq!(analyst.cached_description(), result.description);
        assert_eq!(analyst.budget_snapshot().total_calls, 1);
        assert!(provider.last_prompt().unwrap().contains("2 subject(s) at 87%"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_returns_cached_without_call() {
        let provider = MockProvider::new("gemini", "Calm scene.").arc();
        let analyst = analyst(provider.clone());

        analyst.analyze(&test_image(), 1, context()).await;
        tokio::time::advance(Duration::from_secs(3)).await;
        let second = analyst.analyze(&test_image(), 2, context()).await;

        assert_eq!(provider.calls(), 1);
        assert_eq!(second.trigger_reason, TriggerReason::RateLimited);
        assert_eq!(second.description, "Calm scene.");
        assert!(second.keywords.is_empty());
        assert_eq!(analyst.time_until_next_call(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_applies_backoff_without_recording() {
        let provider = MockProvider::new("gemini", "Calm scene.").arc();
        provider.push_error(VisionError::request_failed("connection reset"));
        let analyst = analyst(provider.clone());

        let result = analyst.analyze(&test_image(), 1, context()).await;
        assert_eq!(result.trigger_reason, TriggerReason::Error);
        assert_eq!(result.description, INITIAL_DESCRIPTION);
        assert_eq!(analyst.budget_snapshot().total_calls, 0);
        // 10s penalty plus 7s spacing
        assert_eq!(analyst.time_until_next_call(), Duration::from_secs(17));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_error_honors_retry_after() {
        let provider = MockProvider::new("gemini", "Calm scene.").arc();
        provider.push_error(VisionError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        });
        let analyst = analyst(provider);

        analyst.analyze(&test_image(), 1, context()).await;
        assert_eq!(analyst.time_until_next_call(), Duration::from_secs(37));
    }

    #[tokio::test]
    async fn test_unavailable_analyst_makes_no_call() {
        let analyst = ThrottledAnalyst::new(None, BudgetConfig::ANALYST);
        assert!(!analyst.is_available());
        let result = analyst.analyze(&test_image(), 1, context()).await;
        assert_eq!(result.trigger_reason, TriggerReason::Error);
        assert_eq!(result.description, INITIAL_DESCRIPTION);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_call_is_rejected_while_in_flight() {
        let provider = MockProvider::new("gemini", "Calm scene.")
            .with_delay(Duration::from_secs(2))
            .arc();
        let analyst = Arc::new(analyst(provider.clone()));

        let a = {
            let analyst = Arc::clone(&analyst);
            tokio::spawn(async move { analyst.analyze(&test_image(), 1, context()).await })
        };
        tokio::task::yield_now().await;
        assert!(analyst.is_busy());
        let b = analyst.analyze(&test_image(), 2, context()).await;
        assert_eq!(b.trigger_reason, TriggerReason::RateLimited);

        let a = a.await.unwrap();
        assert_eq!(a.trigger_reason, TriggerReason::EscalationEligible);
        assert_eq!(provider.calls(), 1);
        assert!(!analyst.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_placeholder_and_budget() {
        let provider = MockProvider::new("gemini", "Calm scene.").arc();
        let analyst = analyst(provider);
        analyst.analyze(&test_image(), 1, context()).await;
        analyst.reset();
        assert_eq!(analyst.cached_description(), INITIAL_DESCRIPTION);
        assert!(analyst.can_call_now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_spanning_reset_does_not_leak_into_new_epoch() {
        let provider = MockProvider::new("gemini", "Old session scene.")
            .with_delay(Duration::from_secs(5))
            .arc();
        let analyst = Arc::new(analyst(provider.clone()));

        let stale = {
            let analyst = Arc::clone(&analyst);
            tokio::spawn(async move { analyst.analyze(&test_image(), 1, context()).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(analyst.is_busy());

        analyst.reset();
        assert!(!analyst.is_busy());
        assert!(analyst.can_call_now());

        // The new epoch may call while the stale one is still running
        let fresh = {
            let analyst = Arc::clone(&analyst);
            tokio::spawn(async move { analyst.analyze(&test_image(), 1, context()).await })
        };

        let stale = stale.await.unwrap();
        assert_eq!(stale.trigger_reason, TriggerReason::EscalationEligible);
        assert_eq!(analyst.budget_snapshot().total_calls, 0);
        assert_eq!(analyst.cached_description(), INITIAL_DESCRIPTION);

        let fresh = fresh.await.unwrap();
        assert_eq!(fresh.trigger_reason, TriggerReason::EscalationEligible);
        assert_eq!(provider.calls(), 2);
        assert_eq!(analyst.budget_snapshot().total_calls, 1);
        assert_eq!(analyst.cached_description(), "Old session scene.");
        assert!(!analyst.is_busy());
    }

    #[test]
    fn test_prompt_without_activity() {
        let prompt = build_prompt(&DetectionContext::default());
        assert!(prompt.contains("no notable movement"));
    }
}
