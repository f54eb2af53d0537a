//! Call budget: minimum spacing between calls plus a rolling window cap.
//!
//! Pure state machine. Callers pass `now` explicitly, which keeps it
//! deterministic under a paused tokio clock.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use vigil_models::BudgetSnapshot;

/// Limits for one provider tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetConfig {
    pub min_interval: Duration,
    pub max_calls_per_window: u32,
    pub window: Duration,
}

impl BudgetConfig {
    /// Throttled analyst: 7 s spacing, 8 calls per minute.
    pub const ANALYST: BudgetConfig = BudgetConfig {
        min_interval: Duration::from_millis(7000),
        max_calls_per_window: 8,
        window: Duration::from_millis(60_000),
    };

    /// Specialist escalator: 20 s spacing, 3 calls per minute.
    pub const SPECIALIST: BudgetConfig = BudgetConfig {
        min_interval: Duration::from_millis(20_000),
        max_calls_per_window: 3,
        window: Duration::from_millis(60_000),
    };
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self::ANALYST
    }
}

#[derive(Debug, Clone)]
pub struct CallBudget {
    config: BudgetConfig,
    /// May lie in the future after a penalty.
    last_call_at: Option<Instant>,
    window: VecDeque<Instant>,
    total_calls: u64,
}

impl CallBudget {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            last_call_at: None,
            window: VecDeque::new(),
            total_calls: 0,
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.window.front() {
            if now.saturating_duration_since(oldest) >= self.config.window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn interval_wait(&self, now: Instant) -> Duration {
        match self.last_call_at {
            Some(last) if last > now => (last - now) + self.config.min_interval,
            Some(last) => self.config.min_interval.saturating_sub(now - last),
            None => Duration::ZERO,
        }
    }

    fn window_wait(&self, now: Instant) -> Duration {
        if (self.window.len() as u32) < self.config.max_calls_per_window {
            return Duration::ZERO;
        }
        match self.window.front() {
            Some(&oldest) => self
                .config
                .window
                .saturating_sub(now.saturating_duration_since(oldest)),
            None => Duration::ZERO,
        }
    }

    /// True iff both the spacing and the window cap allow a call at `now`.
    pub fn can_call(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.interval_wait(now).is_zero()
            && (self.window.len() as u32) < self.config.max_calls_per_window
    }

    pub fn record_call(&mut self, now: Instant) {
        self.prune(now);
        self.last_call_at = Some(now);
        self.window.push_back(now);
        self.total_calls += 1;
    }

    /// Larger of the spacing wait and the window wait.
    pub fn time_until_next_call(&mut self, now: Instant) -> Duration {
        self.prune(now);
        self.interval_wait(now).max(self.window_wait(now))
    }

    /// Push `last_call_at` forward so the next call waits at least
    /// `penalty + min_interval`. Does not count as a call.
    pub fn penalize(&mut self, now: Instant, penalty: Duration) {
        let shifted = now + penalty;
        if self.last_call_at.map_or(true, |last| shifted > last) {
            self.last_call_at = Some(shifted);
        }
    }

    pub fn calls_in_window(&mut self, now: Instant) -> u32 {
        self.prune(now);
        self.window.len() as u32
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls
    }

    pub fn snapshot(&mut self, now: Instant) -> BudgetSnapshot {
        let wait = self.time_until_next_call(now);
        BudgetSnapshot {
            calls_in_window: self.window.len() as u32,
            max_calls_per_window: self.config.max_calls_per_window,
            total_calls: self.total_calls,
            time_until_next_call_ms: wait.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_first_call_allowed() {
        let mut budget = CallBudget::new(BudgetConfig::ANALYST);
        let t0 = Instant::now();
        assert!(budget.can_call(t0));
        assert_eq!(budget.time_until_next_call(t0), Duration::ZERO);
    }

    #[test]
    fn test_min_interval_scenario() {
        let mut budget = CallBudget::new(BudgetConfig::ANALYST);
        let t0 = Instant::now();
        assert!(budget.can_call(t0));
        budget.record_call(t0);

        assert!(!budget.can_call(t0 + ms(3000)));
        assert_eq!(budget.time_until_next_call(t0 + ms(3000)), ms(4000));

        assert!(budget.can_call(t0 + ms(7000)));
    }

    #[test]
    fn test_window_cap() {
        let config = BudgetConfig {
            min_interval: ms(1000),
            max_calls_per_window: 3,
            window: ms(10_000),
        };
        let mut budget = CallBudget::new(config);
        let t0 = Instant::now();
        for i in 0..3 {
            let now = t0 + ms(i * 1000);
            assert!(budget.can_call(now));
            budget.record_call(now);
        }

        // Spacing satisfied, window full until the first entry expires at 10s
        let now = t0 + ms(5000);
        assert!(!budget.can_call(now));
        assert_eq!(budget.time_until_next_call(now), ms(5000));
        assert_eq!(budget.calls_in_window(now), 3);

        assert!(budget.can_call(t0 + ms(10_000)));
        assert_eq!(budget.calls_in_window(t0 + ms(10_000)), 2);
    }

    #[test]
    fn test_wait_is_max_of_both_constraints() {
        let config = BudgetConfig {
            min_interval: ms(4000),
            max_calls_per_window: 2,
            window: ms(10_000),
        };
        let mut budget = CallBudget::new(config);
        let t0 = Instant::now();
        budget.record_call(t0);
        budget.record_call(t0 + ms(4000));

        // interval wait 3000, window wait 5000
        assert_eq!(budget.time_until_next_call(t0 + ms(5000)), ms(5000));
        // interval wait 1000 dominates once the window frees up
        let mut fresh = CallBudget::new(BudgetConfig {
            min_interval: ms(4000),
            max_calls_per_window: 1,
            window: ms(2000),
        });
        fresh.record_call(t0);
        assert_eq!(fresh.time_until_next_call(t0 + ms(3000)), ms(1000));
    }

    #[test]
    fn test_penalty_shifts_last_call_into_future() {
        let mut budget = CallBudget::new(BudgetConfig::ANALYST);
        let t0 = Instant::now();
        budget.penalize(t0, ms(10_000));

        assert!(!budget.can_call(t0));
        assert_eq!(budget.time_until_next_call(t0), ms(17_000));
        assert!(budget.can_call(t0 + ms(17_000)));
        assert_eq!(budget.total_calls(), 0);
        assert_eq!(budget.calls_in_window(t0), 0);
    }

    #[test]
    fn test_penalty_never_moves_backwards() {
        let mut budget = CallBudget::new(BudgetConfig::ANALYST);
        let t0 = Instant::now();
        budget.penalize(t0, ms(10_000));
        budget.penalize(t0, ms(1_000));
        assert_eq!(budget.time_until_next_call(t0), ms(17_000));
    }

    #[test]
    fn test_trailing_window_never_exceeds_cap() {
        let config = BudgetConfig {
            min_interval: ms(500),
            max_calls_per_window: 4,
            window: ms(6000),
        };
        let mut budget = CallBudget::new(config);
        let t0 = Instant::now();
        let mut calls = Vec::new();

        // Try to call every 100ms for 30s; only permitted calls are recorded
        for step in 0..300u64 {
            let now = t0 + ms(step * 100);
            if budget.can_call(now) {
                budget.record_call(now);
                calls.push(now);
            }
        }

        for (i, &start) in calls.iter().enumerate() {
            let in_window = calls[i..]
                .iter()
                .take_while(|&&t| t.duration_since(start) < config.window)
                .count();
            assert!(in_window <= 4, "window starting at call {} holds {}", i, in_window);
        }
        for pair in calls.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= config.min_interval);
        }
    }

    #[test]
    fn test_snapshot() {
        let mut budget = CallBudget::new(BudgetConfig::ANALYST);
        let t0 = Instant::now();
        budget.record_call(t0);
        let snap = budget.snapshot(t0 + ms(2000));
        assert_eq!(snap.calls_in_window, 1);
        assert_eq!(snap.max_calls_per_window, 8);
        assert_eq!(snap.total_calls, 1);
        assert_eq!(snap.time_until_next_call_ms, 5000);
    }
}
