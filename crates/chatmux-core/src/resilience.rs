//! Fault-tolerance façade: per-provider rate limiting in front of
//! per-provider circuit breaking.
//!
//! A [`ResilienceContext`] owns every limiter and breaker. It is built once
//! by the application root and shared (`Arc`) with whoever issues provider
//! calls.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chatmux_adapters::{ProviderId, ProviderResult};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::breaker::{BreakerError, BreakerSnapshot, CircuitBreaker, CircuitState};
use crate::config::{CircuitBreakerConfig, RateLimitConfig};
use crate::error::{ChatError, ChatResult};
use crate::ratelimit::{ProviderRateLimiter, RateLimitStatus};

#[derive(Debug, Default)]
pub struct ResilienceContext {
    limiters: Mutex<HashMap<ProviderId, Arc<ProviderRateLimiter>>>,
    breakers: Mutex<HashMap<ProviderId, Arc<CircuitBreaker>>>,
}

impl ResilienceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The provider's limiter, created from `config` on first use.
    pub fn rate_limiter(&self, provider: ProviderId, config: &RateLimitConfig) -> Arc<ProviderRateLimiter> {
        self.limiters
            .lock()
            .entry(provider)
            .or_insert_with(|| Arc::new(ProviderRateLimiter::new(config.clone())))
            .clone()
    }

    /// The provider's breaker, created from `config` on first use.
    pub fn circuit_breaker(&self, provider: ProviderId, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .lock()
            .entry(provider)
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, config.clone())))
            .clone()
    }

    /// Run `op` under `provider`'s rate limit and circuit breaker.
    ///
    /// The rate limit for `key` is checked first; a denial returns
    /// [`ChatError::RateLimited`] without touching the breaker or running
    /// `op`. Otherwise `op` runs through the breaker.
    pub async fn with_fault_tolerance<T, F, Fut>(
        &self,
        provider: ProviderId,
        rate_limit: &RateLimitConfig,
        breaker: &CircuitBreakerConfig,
        key: &str,
        tokens: u32,
        op: F,
    ) -> ChatResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let decision = self.rate_limiter(provider, rate_limit).check_limit(key, tokens);
        if !decision.allowed {
            let retry_after = decision.retry_after.unwrap_or_default();
            return Err(ChatError::RateLimited {
                provider,
                retry_after,
                reset_time: decision.reset_time.unwrap_or_else(Utc::now),
            });
        }

        let breaker = self.circuit_breaker(provider, breaker);
        breaker.execute(op).await.map_err(|err| match err {
            BreakerError::Open { provider, retry_in } => ChatError::CircuitOpen { provider, retry_in },
            BreakerError::Inner(err) => ChatError::Provider(err),
        })
    }

    /// `None` until the provider's first call.
    pub fn breaker_state(&self, provider: ProviderId) -> Option<CircuitState> {
        self.breakers.lock().get(&provider).map(|b| b.state())
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.lock().values().map(|b| b.snapshot()).collect();
        snapshots.sort_by_key(|s| s.provider);
        snapshots
    }

    /// Close the provider's breaker. Returns `false` if it never existed.
    pub fn reset_breaker(&self, provider: ProviderId) -> bool {
        match self.breakers.lock().get(&provider) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn rate_limit_status(&self, provider: ProviderId, key: &str) -> Option<RateLimitStatus> {
        self.limiters.lock().get(&provider).map(|l| l.status(key))
    }

    /// Drop idle buckets across all providers.
    pub fn cleanup_rate_limiters(&self, max_age: Duration) -> usize {
        let limiters: Vec<_> = self.limiters.lock().values().cloned().collect();
        limiters.iter().map(|l| l.cleanup(max_age)).sum()
    }

    /// Sweep idle buckets every `interval` until the handle is aborted.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration, max_age: Duration) -> JoinHandle<()> {
        let context = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = context.cleanup_rate_limiters(max_age);
                if removed > 0 {
                    tracing::debug!(removed, "Dropped idle rate-limit buckets");
                }
            }
        })
    }
}
