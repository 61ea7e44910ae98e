//! Cached provider health probes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chatmux_adapters::{ProviderHealth, ProviderId};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::HealthConfig;
use crate::registry::ModelRegistry;

/// Probes providers through the registry's adapters and remembers each
/// verdict for a TTL.
#[derive(Debug)]
pub struct HealthMonitor {
    registry: Arc<ModelRegistry>,
    ttl: Duration,
    probe_timeout: Duration,
    cache: Mutex<HashMap<ProviderId, (Instant, ProviderHealth)>>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ModelRegistry>, ttl: Duration, probe_timeout: Duration) -> Self {
        Self {
            registry,
            ttl,
            probe_timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(registry: Arc<ModelRegistry>, config: &HealthConfig) -> Self {
        Self::new(registry, config.cache_ttl(), config.timeout())
    }

    /// The cached verdict for `provider`, if still fresh.
    pub fn cached(&self, provider: ProviderId) -> Option<ProviderHealth> {
        let cache = self.cache.lock();
        cache
            .get(&provider)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, health)| health.clone())
    }

    /// Health of one provider, probing only when the cache is stale.
    pub async fn provider_health(&self, provider: ProviderId) -> ProviderHealth {
        if let Some(health) = self.cached(provider) {
            return health;
        }

        let Ok(adapter) = self.registry.adapter(provider) else {
            return ProviderHealth::unknown(provider, "provider not configured");
        };

        let mut probe = tokio::spawn(async move { adapter.health_check().await });
        let health = match tokio::time::timeout(self.probe_timeout, &mut probe).await {
            Ok(Ok(health)) => health,
            Ok(Err(err)) => {
                tracing::warn!(%provider, error = %err, "Health probe crashed");
                ProviderHealth::unknown(provider, format!("health probe failed: {err}"))
            }
            Err(_) => {
                probe.abort();
                tracing::warn!(%provider, timeout_ms = self.probe_timeout.as_millis() as u64, "Health probe timed out");
                ProviderHealth::unknown(provider, "health probe timed out")
            }
        };

        tracing::debug!(%provider, status = ?health.status, "Provider health refreshed");
        self.cache.lock().insert(provider, (Instant::now(), health.clone()));
        health
    }

    /// Health of every known provider, probed concurrently, in
    /// [`ProviderId::ALL`] order.
    pub async fn all_provider_health(&self) -> Vec<ProviderHealth> {
        join_all(ProviderId::ALL.map(|p| self.provider_health(p))).await
    }

    /// Drop the cached verdict for one provider, or all of them.
    pub fn invalidate(&self, provider: Option<ProviderId>) {
        let mut cache = self.cache.lock();
        match provider {
            Some(provider) => {
                cache.remove(&provider);
            }
            None => cache.clear(),
        }
    }
}
