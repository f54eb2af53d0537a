//! Retry for analysis writes.
//!
//! Records come from a live feed. A write that cannot land within
//! `give_up_after` is abandoned, since a newer record for the same session
//! follows within seconds. Between attempts the delay grows exponentially
//! with equal jitter, or follows the server's Retry-After when that still
//! fits in the remaining time.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_retry;

/// Write retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, the first one included. 1 disables retries.
    pub max_attempts: u32,
    /// Backoff ceiling before the first retry; doubles per retry.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Wall-clock limit for one write including all retries.
    pub give_up_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            give_up_after: Duration::from_secs(8),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl RetryConfig {
    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            env_parse::<u64>(key).map_or(default, Duration::from_millis)
        };
        Self {
            max_attempts: env_parse::<u32>("FIRESTORE_WRITE_ATTEMPTS")
                .unwrap_or(defaults.max_attempts)
                .max(1),
            initial_backoff: millis("FIRESTORE_RETRY_BASE_MS", defaults.initial_backoff),
            max_backoff: millis("FIRESTORE_RETRY_MAX_MS", defaults.max_backoff),
            give_up_after: millis("FIRESTORE_RETRY_DEADLINE_MS", defaults.give_up_after),
        }
    }

    /// Un-jittered delay ceiling before retry number `retry` (0-based).
    fn ceiling(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Half the ceiling plus a random share of the other half.
fn equal_jitter(ceiling: Duration, seed: u32) -> Duration {
    let half = ceiling / 2;
    half + half.mul_f64(f64::from(seed % 1000) / 1000.0)
}

fn clock_seed() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0)
}

/// Retry state for one write.
struct Backoff {
    config: RetryConfig,
    retries: u32,
    started: Instant,
}

impl Backoff {
    fn new(config: RetryConfig) -> Self {
        Self {
            config,
            retries: 0,
            started: Instant::now(),
        }
    }

    /// Delay before the next attempt, or `None` to give up with `error`.
    fn next_delay(&mut self, error: &FirestoreError) -> Option<Duration> {
        if !error.is_retryable() || self.retries + 1 >= self.config.max_attempts {
            return None;
        }
        let delay = match error.retry_after_ms() {
            Some(ms) => Duration::from_millis(ms),
            None => equal_jitter(self.config.ceiling(self.retries), clock_seed()),
        };
        if self.started.elapsed() + delay > self.config.give_up_after {
            return None;
        }
        self.retries += 1;
        Some(delay)
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy gives up.
///
/// Network errors, 429 and 5xx are retried. The last error is returned.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    op: F,
) -> FirestoreResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = FirestoreResult<T>>,
{
    let mut backoff = Backoff::new(*config);

    loop {
        let span = info_span!("firestore_write", operation = %operation, attempt = backoff.retries + 1);
        let error = match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let Some(delay) = backoff.next_delay(&error) else {
            if backoff.retries > 0 {
                debug!(operation = %operation, retries = backoff.retries, "Giving up on Firestore write");
            }
            return Err(error);
        };

        warn!(
            operation = %operation,
            retry = backoff.retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Firestore write failed, retrying"
        );
        record_retry(operation);
        tokio::time::sleep(delay).await;
    }
}
