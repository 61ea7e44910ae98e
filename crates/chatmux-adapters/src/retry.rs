//! Exponential backoff with jitter for adapter calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;
use crate::provider::ProviderId;

/// Fraction of the computed delay added as random jitter, at most.
const JITTER_FRACTION: f64 = 0.1;

/// Retry budget and backoff curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// `base * factor^(attempt - 1)` in milliseconds, before jitter and cap.
    fn backoff_ms(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1) as i32;
        self.base_delay_ms as f64 * self.backoff_factor.powi(exponent)
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based),
    /// with `jitter` in `0.0..=1.0` scaling the random component.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let backoff = self.backoff_ms(attempt);
        let jitter = backoff * JITTER_FRACTION * jitter.clamp(0.0, 1.0);
        let capped = (backoff + jitter).min(self.max_delay_ms as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        self.delay_with_jitter(attempt, jitter)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error propagates.
    pub async fn run<T, F, Fut>(&self, provider: ProviderId, operation: &str, mut op: F) -> ProviderResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() || attempt >= attempts => return Err(err),
                Err(err) => {
                    let mut delay = self.delay_for(attempt);
                    if let Some(wait) = err.retry_after() {
                        delay = delay.max(wait).min(self.max_delay());
                    }
                    tracing::warn!(
                        %provider,
                        operation,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
