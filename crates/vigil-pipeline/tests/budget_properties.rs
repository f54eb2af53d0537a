//! Limiter properties under a greedy caller.

use std::time::Duration;

use tokio::time::Instant;
use vigil_pipeline::{BudgetConfig, CallBudget};

const STEP: Duration = Duration::from_millis(100);

/// Call whenever permitted over `span`, returning call offsets from start.
fn greedy_calls(config: BudgetConfig, span: Duration) -> Vec<Duration> {
    let start = Instant::now();
    let mut budget = CallBudget::new(config);
    let mut calls = Vec::new();
    let mut offset = Duration::ZERO;
    while offset <= span {
        let now = start + offset;
        let permitted = budget.can_call(now);
        assert_eq!(permitted, budget.time_until_next_call(now).is_zero());
        if permitted {
            budget.record_call(now);
            calls.push(offset);
        }
        offset += STEP;
    }
    calls
}

fn assert_properties(config: BudgetConfig, calls: &[Duration]) {
    for pair in calls.windows(2) {
        assert!(pair[1] - pair[0] >= config.min_interval, "spacing violated: {:?}", pair);
    }
    for (i, first) in calls.iter().enumerate() {
        let in_window = calls[i..]
            .iter()
            .take_while(|t| **t - *first < config.window)
            .count();
        assert!(in_window as u32 <= config.max_calls_per_window);
    }
}

#[test]
fn analyst_defaults_hold_over_five_minutes() {
    let config = BudgetConfig::ANALYST;
    let calls = greedy_calls(config, Duration::from_secs(300));
    assert_properties(config, &calls);
    // 7s spacing allows at most 9 calls in 60s, the window caps at 8
    let first_minute = calls.iter().filter(|t| **t < Duration::from_secs(60)).count();
    assert_eq!(first_minute, 8);
}

#[test]
fn specialist_defaults_hold_over_five_minutes() {
    let config = BudgetConfig::SPECIALIST;
    let calls = greedy_calls(config, Duration::from_secs(300));
    assert_properties(config, &calls);
    let first_minute = calls.iter().filter(|t| **t < Duration::from_secs(60)).count();
    assert_eq!(first_minute, 3);
}

#[test]
fn window_cap_binds_before_spacing() {
    let config = BudgetConfig {
        min_interval: Duration::from_secs(1),
        max_calls_per_window: 4,
        window: Duration::from_secs(30),
    };
    let calls = greedy_calls(config, Duration::from_secs(120));
    assert_properties(config, &calls);
    assert_eq!(&calls[..5], &[
        Duration::from_secs(0),
        Duration::from_secs(1),
        Duration::from_secs(2),
        Duration::from_secs(3),
        Duration::from_secs(30),
    ]);
}
