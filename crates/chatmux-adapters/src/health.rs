//! Point-in-time provider health snapshots.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderId;
use crate::response::RateLimitInfo;

/// Latency above which a reachable provider is reported as degraded.
pub const DEGRADED_LATENCY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "🟢 healthy"),
            HealthStatus::Degraded => write!(f, "🟡 degraded"),
            HealthStatus::Unhealthy => write!(f, "🔴 unhealthy"),
            HealthStatus::Unknown => write!(f, "⚪ unknown"),
        }
    }
}

/// Result of probing a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub provider: ProviderId,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub last_checked: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,
}

impl ProviderHealth {
    /// A successful probe. Slow or quota-exhausted providers are degraded.
    pub fn reachable(
        provider: ProviderId,
        latency: Duration,
        rate_limit: Option<RateLimitInfo>,
    ) -> Self {
        let exhausted = rate_limit.as_ref().is_some_and(RateLimitInfo::is_exhausted);
        let status = if latency > DEGRADED_LATENCY || exhausted {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Self {
            provider,
            status,
            latency_ms: Some(latency.as_millis() as u64),
            last_checked: Utc::now(),
            error: None,
            rate_limit,
        }
    }

    pub fn unhealthy(provider: ProviderId, error: impl Into<String>) -> Self {
        Self {
            provider,
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            last_checked: Utc::now(),
            error: Some(error.into()),
            rate_limit: None,
        }
    }

    /// The probe itself could not produce a verdict.
    pub fn unknown(provider: ProviderId, reason: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unknown,
            ..Self::unhealthy(provider, reason)
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = Some(latency.as_millis() as u64);
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: Option<RateLimitInfo>) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Whether requests should be routed to this provider.
    pub fn is_usable(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slow_or_exhausted_is_degraded() {
        let fast = ProviderHealth::reachable(ProviderId::OpenAi, Duration::from_millis(120), None);
        assert_eq!(fast.status, HealthStatus::Healthy);
        assert_eq!(fast.latency_ms, Some(120));

        let slow = ProviderHealth::reachable(ProviderId::OpenAi, Duration::from_secs(4), None);
        assert_eq!(slow.status, HealthStatus::Degraded);

        let exhausted = ProviderHealth::reachable(
            ProviderId::OpenAi,
            Duration::from_millis(50),
            Some(RateLimitInfo {
                limit: Some(60),
                remaining: Some(0),
                reset: None,
            }),
        );
        assert_eq!(exhausted.status, HealthStatus::Degraded);
        assert!(exhausted.is_usable());
    }

    #[test]
    fn test_unknown_is_not_usable() {
        let health = ProviderHealth::unknown(ProviderId::Gemini, "not configured");
        assert_eq!(health.status, HealthStatus::Unknown);
        assert_eq!(health.error.as_deref(), Some("not configured"));
        assert!(!health.is_usable());
    }
}
