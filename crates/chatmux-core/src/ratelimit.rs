//! Token-bucket rate limiting, keyed by arbitrary strings
//! (typically `provider:session`).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// A token bucket that starts full at `capacity` and refills at
/// `refill_rate` tokens per second.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    capacity: f64,
    refill_rate: f64,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
            capacity,
            refill_rate,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity(), config.refill_per_second())
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take `tokens` if that many are available. A rejection leaves the
    /// bucket untouched (apart from the refill).
    pub fn consume(&mut self, tokens: f64) -> bool {
        self.refill();
        if self.tokens >= tokens {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }

    /// Refill and report the current level without consuming.
    pub fn available_tokens(&mut self) -> f64 {
        self.refill();
        self.tokens
    }

    /// Wait until at least one whole token is available.
    pub fn time_to_next_token(&self) -> Duration {
        self.time_until(1.0)
    }

    /// Wait until the bucket is full again.
    pub fn time_to_full(&self) -> Duration {
        self.time_until(self.capacity)
    }

    fn time_until(&self, level: f64) -> Duration {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        let projected = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        if projected >= level || self.refill_rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((level - projected) / self.refill_rate)
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }
}

/// Outcome of [`ProviderRateLimiter::check_limit`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// How long until the request would be allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<DateTime<Utc>>,
}

impl RateLimitDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: None,
            reset_time: None,
        }
    }

    fn denied(wait: Duration) -> Self {
        Self {
            allowed: false,
            retry_after: Some(wait),
            reset_time: Some(after(wait)),
        }
    }
}

/// Quota snapshot for one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    /// Whole tokens left.
    pub remaining: u32,
    pub capacity: u32,
    /// When the bucket will be full again.
    pub reset_time: DateTime<Utc>,
}

fn after(wait: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(wait).map_or(now, |d| now + d)
}

/// A set of token buckets sharing one configuration, created on demand.
#[derive(Debug)]
pub struct ProviderRateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl ProviderRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Try to take `tokens` from the bucket for `key`.
    pub fn check_limit(&self, key: &str, tokens: u32) -> RateLimitDecision {
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::from_config(&self.config));

        if bucket.consume(f64::from(tokens)) {
            RateLimitDecision::allowed()
        } else {
            let wait = bucket.time_to_next_token();
            tracing::debug!(key, wait_ms = wait.as_millis() as u64, "Rate limit denied");
            RateLimitDecision::denied(wait)
        }
    }

    /// Report the quota for `key` without consuming. Unknown keys report a
    /// full bucket.
    pub fn status(&self, key: &str) -> RateLimitStatus {
        let mut buckets = self.buckets.lock();
        let (remaining, capacity, to_full) = match buckets.get_mut(key) {
            Some(bucket) => {
                let remaining = bucket.available_tokens();
                (remaining, bucket.capacity(), bucket.time_to_full())
            }
            None => (self.config.capacity(), self.config.capacity(), Duration::ZERO),
        };
        RateLimitStatus {
            remaining: remaining.floor() as u32,
            capacity: capacity.floor() as u32,
            reset_time: after(to_full),
        }
    }

    /// Drop buckets not refilled within `max_age`; returns how many went.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.last_refill().elapsed() <= max_age);
        before - buckets.len()
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
