//! Configuration for chatmux, typically stored at `~/.chatmux/config.toml`.
//!
//! Every section has serde defaults, so an empty (or missing) file is a
//! valid configuration. API keys not present in the file are read from the
//! provider's environment variable (`OPENAI_API_KEY`, ...).

use std::path::{Path, PathBuf};
use std::time::Duration;

use chatmux_adapters::{ProviderId, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatResult};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "CHATMUX_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatmuxConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Client-side request quotas, per provider.
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Adapter-level retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub health: HealthConfig,

    /// Default chat settings.
    #[serde(default)]
    pub chat: ChatSettings,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl ChatmuxConfig {
    /// `$CHATMUX_CONFIG`, else `~/.chatmux/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
            _ => dirs_next::home_dir().map(|home| home.join(".chatmux").join("config.toml")),
        }
    }

    /// Load from the default location; a missing file yields the defaults.
    pub fn load() -> ChatResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> ChatResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&raw)
            .map_err(|e| ChatError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(raw: &str) -> ChatResult<Self> {
        toml::from_str(raw).map_err(|e| ChatError::Config(e.to_string()))
    }

    /// Serialize for `chatmux status`. API keys are never written out.
    pub fn to_toml_redacted(&self) -> ChatResult<String> {
        let mut copy = self.clone();
        for provider in ProviderId::ALL {
            let entry = copy.providers.get_mut(provider);
            if entry.api_key.is_some() {
                entry.api_key = Some("[REDACTED]".into());
            }
        }
        toml::to_string_pretty(&copy).map_err(|e| ChatError::Config(e.to_string()))
    }
}

// ── Providers ────────────────────────────────────────────────

/// Per-provider connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key; falls back to the provider's environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the public endpoint (proxy, gateway, mock server).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub anthropic: ProviderConfig,
    #[serde(default)]
    pub gemini: ProviderConfig,
    #[serde(default)]
    pub mistral: ProviderConfig,
}

impl ProvidersConfig {
    pub fn get(&self, provider: ProviderId) -> &ProviderConfig {
        match provider {
            ProviderId::OpenAi => &self.openai,
            ProviderId::Anthropic => &self.anthropic,
            ProviderId::Gemini => &self.gemini,
            ProviderId::Mistral => &self.mistral,
        }
    }

    pub fn get_mut(&mut self, provider: ProviderId) -> &mut ProviderConfig {
        match provider {
            ProviderId::OpenAi => &mut self.openai,
            ProviderId::Anthropic => &mut self.anthropic,
            ProviderId::Gemini => &mut self.gemini,
            ProviderId::Mistral => &mut self.mistral,
        }
    }

    /// The key to use for `provider`: config file first, then environment.
    /// `None` when the provider is disabled or no non-empty key exists.
    pub fn api_key(&self, provider: ProviderId) -> Option<String> {
        let entry = self.get(provider);
        if !entry.enabled {
            return None;
        }
        entry
            .api_key
            .clone()
            .or_else(|| std::env::var(provider.api_key_env()).ok())
            .filter(|key| !key.trim().is_empty())
    }

    /// Providers with a usable key.
    pub fn configured(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|p| self.api_key(*p).is_some())
            .collect()
    }
}

// ── Rate limits ──────────────────────────────────────────────

/// Token-bucket parameters for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,

    /// Bucket capacity as a multiple of the per-minute quota.
    #[serde(default = "default_burst_allowance")]
    pub burst_allowance: f64,
}

impl RateLimitConfig {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            burst_allowance: default_burst_allowance(),
        }
    }

    pub fn with_burst_allowance(mut self, burst_allowance: f64) -> Self {
        self.burst_allowance = burst_allowance;
        self
    }

    /// Maximum tokens a bucket holds.
    pub fn capacity(&self) -> f64 {
        f64::from(self.requests_per_minute.max(1)) * self.burst_allowance.max(1.0)
    }

    /// Tokens added per second.
    pub fn refill_per_second(&self) -> f64 {
        f64::from(self.requests_per_minute.max(1)) / 60.0
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    /// Buckets idle for longer than this are dropped by the cleanup sweep.
    #[serde(default = "default_bucket_max_age_secs")]
    pub bucket_max_age_secs: u64,

    #[serde(default = "default_openai_rpm")]
    pub openai: RateLimitConfig,
    #[serde(default = "default_anthropic_rpm")]
    pub anthropic: RateLimitConfig,
    #[serde(default = "default_gemini_rpm")]
    pub gemini: RateLimitConfig,
    #[serde(default = "default_mistral_rpm")]
    pub mistral: RateLimitConfig,
}

impl RateLimitsConfig {
    pub fn get(&self, provider: ProviderId) -> &RateLimitConfig {
        match provider {
            ProviderId::OpenAi => &self.openai,
            ProviderId::Anthropic => &self.anthropic,
            ProviderId::Gemini => &self.gemini,
            ProviderId::Mistral => &self.mistral,
        }
    }

    pub fn bucket_max_age(&self) -> Duration {
        Duration::from_secs(self.bucket_max_age_secs)
    }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            bucket_max_age_secs: default_bucket_max_age_secs(),
            openai: default_openai_rpm(),
            anthropic: default_anthropic_rpm(),
            gemini: default_gemini_rpm(),
            mistral: default_mistral_rpm(),
        }
    }
}

fn default_burst_allowance() -> f64 {
    1.2
}

fn default_openai_rpm() -> RateLimitConfig {
    RateLimitConfig::new(60)
}

fn default_anthropic_rpm() -> RateLimitConfig {
    RateLimitConfig::new(50)
}

fn default_gemini_rpm() -> RateLimitConfig {
    RateLimitConfig::new(60)
}

fn default_mistral_rpm() -> RateLimitConfig {
    RateLimitConfig::new(30)
}

fn default_bucket_max_age_secs() -> u64 {
    3600
}

// ── Circuit breaker ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (within the monitoring period) that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before allowing a trial.
    pub recovery_timeout_ms: u64,
    /// Failures further apart than this do not accumulate.
    pub monitoring_period_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn monitoring_period(&self) -> Duration {
        Duration::from_millis(self.monitoring_period_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            monitoring_period_ms: 300_000,
        }
    }
}

// ── Health ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// How long a probe result is served from cache.
    pub cache_ttl_secs: u64,
    /// Upper bound on a single probe.
    pub timeout_secs: u64,
}

impl HealthConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            timeout_secs: 5,
        }
    }
}

// ── Chat ─────────────────────────────────────────────────────

/// What the orchestrator reads before every generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Walk the model's fallback chain when its provider fails.
    pub fallback: bool,
    /// Abort a generation that takes longer than this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl ChatSettings {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: Some(0.7),
            max_tokens: Some(2048),
            streaming: true,
            system_prompt: None,
            fallback: true,
            request_timeout_secs: None,
        }
    }
}

// ── Telemetry ────────────────────────────────────────────────

/// Telemetry/observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Export spans over OTLP. Local JSON logging is always on.
    #[serde(default)]
    pub enabled: bool,

    /// OTLP exporter endpoint.
    #[serde(default = "default_otlp_endpoint")]
    pub otlp_endpoint: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: default_otlp_endpoint(),
            service_name: default_service_name(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".into()
}

fn default_service_name() -> String {
    "chatmux".into()
}
