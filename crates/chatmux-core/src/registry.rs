//! Model registry: the static model catalog, fallback chains per use case,
//! and the adapter factory.
//!
//! Dispatch from a model id to an adapter always goes through the catalog
//! entry's `provider` field.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chatmux_adapters::providers::{AnthropicWire, GeminiWire, MistralWire, OpenAiWire};
use chatmux_adapters::{HttpAdapter, ModelAdapter, ProviderId, RetryPolicy, WireFormat};
use serde::{Deserialize, Serialize};

use crate::config::{ChatmuxConfig, ProviderConfig, ProvidersConfig};
use crate::error::{ChatError, ChatResult};

// ── Catalog ──────────────────────────────────────────────────

/// What a model is good at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Chat,
    Vision,
    Code,
    FunctionCalling,
    LongContext,
    Fast,
    Reasoning,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Chat => "chat",
            Capability::Vision => "vision",
            Capability::Code => "code",
            Capability::FunctionCalling => "function-calling",
            Capability::LongContext => "long-context",
            Capability::Fast => "fast",
            Capability::Reasoning => "reasoning",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "chat" => Ok(Capability::Chat),
            "vision" => Ok(Capability::Vision),
            "code" | "coding" => Ok(Capability::Code),
            "function-calling" | "tools" => Ok(Capability::FunctionCalling),
            "long-context" => Ok(Capability::LongContext),
            "fast" => Ok(Capability::Fast),
            "reasoning" => Ok(Capability::Reasoning),
            other => Err(format!("unknown capability: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Available,
    Maintenance,
    Deprecated,
}

/// One catalog record. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub provider: ProviderId,
    pub context_window: u32,
    pub max_tokens: u32,
    pub capabilities: &'static [Capability],
    pub status: ModelStatus,
    /// Lower sorts first.
    pub priority: u32,
}

impl ModelEntry {
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_available(&self) -> bool {
        self.status == ModelStatus::Available
    }
}

use Capability::*;

static CATALOG: &[ModelEntry] = &[
    ModelEntry {
        id: "gpt-4o",
        name: "GPT-4o",
        provider: ProviderId::OpenAi,
        context_window: 128_000,
        max_tokens: 16_384,
        capabilities: &[Chat, Vision, Code, FunctionCalling, LongContext],
        status: ModelStatus::Available,
        priority: 1,
    },
    ModelEntry {
        id: "gpt-4o-mini",
        name: "GPT-4o mini",
        provider: ProviderId::OpenAi,
        context_window: 128_000,
        max_tokens: 16_384,
        capabilities: &[Chat, Vision, Code, FunctionCalling, Fast],
        status: ModelStatus::Available,
        priority: 2,
    },
    ModelEntry {
        id: "gpt-3.5-turbo",
        name: "GPT-3.5 Turbo",
        provider: ProviderId::OpenAi,
        context_window: 16_385,
        max_tokens: 4_096,
        capabilities: &[Chat, Fast],
        status: ModelStatus::Deprecated,
        priority: 9,
    },
    ModelEntry {
        id: "claude-3-5-sonnet-latest",
        name: "Claude 3.5 Sonnet",
        provider: ProviderId::Anthropic,
        context_window: 200_000,
        max_tokens: 8_192,
        capabilities: &[Chat, Vision, Code, FunctionCalling, LongContext, Reasoning],
        status: ModelStatus::Available,
        priority: 1,
    },
    ModelEntry {
        id: "claude-3-5-haiku-latest",
        name: "Claude 3.5 Haiku",
        provider: ProviderId::Anthropic,
        context_window: 200_000,
        max_tokens: 8_192,
        capabilities: &[Chat, Code, Fast, LongContext],
        status: ModelStatus::Available,
        priority: 2,
    },
    ModelEntry {
        id: "claude-3-opus-latest",
        name: "Claude 3 Opus",
        provider: ProviderId::Anthropic,
        context_window: 200_000,
        max_tokens: 4_096,
        capabilities: &[Chat, Vision, LongContext, Reasoning],
        status: ModelStatus::Available,
        priority: 4,
    },
    ModelEntry {
        id: "gemini-1.5-pro",
        name: "Gemini 1.5 Pro",
        provider: ProviderId::Gemini,
        context_window: 2_097_152,
        max_tokens: 8_192,
        capabilities: &[Chat, Vision, Code, LongContext],
        status: ModelStatus::Available,
        priority: 1,
    },
    ModelEntry {
        id: "gemini-1.5-flash",
        name: "Gemini 1.5 Flash",
        provider: ProviderId::Gemini,
        context_window: 1_048_576,
        max_tokens: 8_192,
        capabilities: &[Chat, Vision, Fast, LongContext],
        status: ModelStatus::Available,
        priority: 3,
    },
    ModelEntry {
        id: "gemini-2.0-flash",
        name: "Gemini 2.0 Flash",
        provider: ProviderId::Gemini,
        context_window: 1_048_576,
        max_tokens: 8_192,
        capabilities: &[Chat, Vision, Code, Fast, LongContext],
        status: ModelStatus::Available,
        priority: 2,
    },
    ModelEntry {
        id: "mistral-large-latest",
        name: "Mistral Large",
        provider: ProviderId::Mistral,
        context_window: 128_000,
        max_tokens: 8_192,
        capabilities: &[Chat, Code, FunctionCalling],
        status: ModelStatus::Available,
        priority: 2,
    },
    ModelEntry {
        id: "mistral-small-latest",
        name: "Mistral Small",
        provider: ProviderId::Mistral,
        context_window: 32_000,
        max_tokens: 8_192,
        capabilities: &[Chat, Fast],
        status: ModelStatus::Available,
        priority: 3,
    },
    ModelEntry {
        id: "codestral-latest",
        name: "Codestral",
        provider: ProviderId::Mistral,
        context_window: 256_000,
        max_tokens: 8_192,
        capabilities: &[Chat, Code],
        status: ModelStatus::Available,
        priority: 2,
    },
    ModelEntry {
        id: "pixtral-large-latest",
        name: "Pixtral Large",
        provider: ProviderId::Mistral,
        context_window: 128_000,
        max_tokens: 8_192,
        capabilities: &[Chat, Vision],
        status: ModelStatus::Maintenance,
        priority: 4,
    },
];

/// Every known model.
pub fn catalog() -> &'static [ModelEntry] {
    CATALOG
}

pub fn get_model(id: &str) -> Option<&'static ModelEntry> {
    CATALOG.iter().find(|m| m.id == id)
}

pub fn models_for_provider(provider: ProviderId) -> Vec<&'static ModelEntry> {
    CATALOG.iter().filter(|m| m.provider == provider).collect()
}

pub fn models_with_capability(capability: Capability) -> Vec<&'static ModelEntry> {
    CATALOG.iter().filter(|m| m.has(capability)).collect()
}

/// Available models, best first.
pub fn available_models() -> Vec<&'static ModelEntry> {
    let mut models: Vec<_> = CATALOG.iter().filter(|m| m.is_available()).collect();
    models.sort_by_key(|m| (m.priority, m.provider));
    models
}

// ── Fallback chains ──────────────────────────────────────────

/// A primary model and the models to try, in order, when it fails.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackChain {
    pub use_case: &'static str,
    pub primary: &'static str,
    pub fallbacks: &'static [&'static str],
}

impl FallbackChain {
    /// Primary first, then fallbacks.
    pub fn models(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.primary).chain(self.fallbacks.iter().copied())
    }
}

static FALLBACK_CHAINS: &[FallbackChain] = &[
    FallbackChain {
        use_case: "general",
        primary: "gpt-4o",
        fallbacks: &["claude-3-5-sonnet-latest", "gemini-1.5-pro", "mistral-large-latest"],
    },
    FallbackChain {
        use_case: "coding",
        primary: "claude-3-5-sonnet-latest",
        fallbacks: &["gpt-4o", "codestral-latest", "gemini-1.5-pro"],
    },
    FallbackChain {
        use_case: "vision",
        primary: "gpt-4o",
        fallbacks: &["claude-3-5-sonnet-latest", "gemini-1.5-pro", "pixtral-large-latest"],
    },
    FallbackChain {
        use_case: "fast",
        primary: "gpt-4o-mini",
        fallbacks: &["claude-3-5-haiku-latest", "gemini-2.0-flash", "mistral-small-latest"],
    },
    FallbackChain {
        use_case: "long-context",
        primary: "gemini-1.5-pro",
        fallbacks: &["claude-3-5-sonnet-latest", "gpt-4o"],
    },
];

pub fn fallback_chains() -> &'static [FallbackChain] {
    FALLBACK_CHAINS
}

pub fn fallback_chain(use_case: &str) -> Option<&'static FallbackChain> {
    FALLBACK_CHAINS.iter().find(|c| c.use_case == use_case)
}

/// Models to try after `model` fails, excluding unavailable ones.
///
/// The chain where `model` is primary wins; otherwise the first chain
/// containing it (minus `model`); otherwise the `general` chain.
pub fn fallbacks_for(model: &str) -> Vec<&'static str> {
    let chain = FALLBACK_CHAINS
        .iter()
        .find(|c| c.primary == model)
        .or_else(|| FALLBACK_CHAINS.iter().find(|c| c.models().any(|m| m == model)))
        .or_else(|| fallback_chain("general"));

    chain
        .into_iter()
        .flat_map(|c| c.models())
        .filter(|m| *m != model)
        .filter(|m| get_model(m).is_some_and(ModelEntry::is_available))
        .collect()
}

/// First model of the chain that is available and passes `is_usable`.
pub fn resolve_chain(
    use_case: &str,
    is_usable: impl Fn(&ModelEntry) -> bool,
) -> Option<&'static ModelEntry> {
    fallback_chain(use_case)?
        .models()
        .filter_map(get_model)
        .find(|m| m.is_available() && is_usable(*m))
}

// ── Adapter factory ──────────────────────────────────────────

fn build<W: WireFormat>(
    api_key: String,
    config: &ProviderConfig,
    retry: &RetryPolicy,
) -> ChatResult<Arc<dyn ModelAdapter>> {
    let mut adapter = HttpAdapter::<W>::new(api_key)?.with_retry_policy(retry.clone());
    if let Some(base_url) = &config.base_url {
        adapter = adapter.with_base_url(base_url)?;
    }
    Ok(Arc::new(adapter))
}

/// Build the adapter for `provider` from configuration.
pub fn create_provider_adapter(
    provider: ProviderId,
    providers: &ProvidersConfig,
    retry: &RetryPolicy,
) -> ChatResult<Arc<dyn ModelAdapter>> {
    let api_key = providers
        .api_key(provider)
        .ok_or(ChatError::ProviderNotConfigured(provider))?;
    let config = providers.get(provider);

    match provider {
        ProviderId::OpenAi => build::<OpenAiWire>(api_key, config, retry),
        ProviderId::Anthropic => build::<AnthropicWire>(api_key, config, retry),
        ProviderId::Gemini => build::<GeminiWire>(api_key, config, retry),
        ProviderId::Mistral => build::<MistralWire>(api_key, config, retry),
    }
}

/// The adapters available to this process, one per configured provider.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    adapters: HashMap<ProviderId, Arc<dyn ModelAdapter>>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("providers", &self.configured_providers())
            .finish()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every provider with a usable key. Providers that
    /// fail to build are logged and left out.
    pub fn from_config(config: &ChatmuxConfig) -> Self {
        let mut registry = Self::new();
        for provider in ProviderId::ALL {
            match create_provider_adapter(provider, &config.providers, &config.retry) {
                Ok(adapter) => registry = registry.with_adapter(adapter),
                Err(ChatError::ProviderNotConfigured(_)) => {
                    tracing::debug!(%provider, "Provider not configured, skipping");
                }
                Err(err) => {
                    tracing::warn!(%provider, error = %err, "Could not create provider adapter");
                }
            }
        }
        registry
    }

    /// Register (or replace) the adapter for its provider.
    pub fn with_adapter(mut self, adapter: Arc<dyn ModelAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    pub fn adapter(&self, provider: ProviderId) -> ChatResult<Arc<dyn ModelAdapter>> {
        self.adapters
            .get(&provider)
            .cloned()
            .ok_or(ChatError::ProviderNotConfigured(provider))
    }

    /// Catalog entry and adapter for a model id.
    pub fn adapter_for_model(&self, model_id: &str) -> ChatResult<(&'static ModelEntry, Arc<dyn ModelAdapter>)> {
        let entry = get_model(model_id).ok_or_else(|| ChatError::UnknownModel(model_id.to_string()))?;
        Ok((entry, self.adapter(entry.provider)?))
    }

    pub fn is_configured(&self, provider: ProviderId) -> bool {
        self.adapters.contains_key(&provider)
    }

    pub fn configured_providers(&self) -> Vec<ProviderId> {
        let mut providers: Vec<_> = self.adapters.keys().copied().collect();
        providers.sort();
        providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_catalog_ids_are_unique() {
        let mut ids: Vec<_> = catalog().iter().map(|m| m.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), catalog().len());
    }

    #[test]
    fn test_chains_reference_catalog_models() {
        for chain in fallback_chains() {
            for model in chain.models() {
                assert!(get_model(model).is_some(), "{} references {model}", chain.use_case);
            }
        }
    }

    #[test]
    fn test_lookup_helpers() {
        assert_eq!(get_model("gemini-1.5-pro").unwrap().provider, ProviderId::Gemini);
        assert!(get_model("gpt-5-ultra").is_none());
        assert_eq!(models_for_provider(ProviderId::Anthropic).len(), 3);
        assert!(models_with_capability(Capability::Vision)
            .iter()
            .all(|m| m.has(Capability::Vision)));

        let available = available_models();
        assert!(available.iter().all(|m| m.is_available()));
        assert!(available.windows(2).all(|w| w[0].priority <= w[1].priority));
        assert!(!available.iter().any(|m| m.id == "gpt-3.5-turbo"));
    }

    #[test]
    fn test_fallbacks_for_primary_and_member() {
        assert_eq!(
            fallbacks_for("gpt-4o-mini"),
            vec!["claude-3-5-haiku-latest", "gemini-2.0-flash", "mistral-small-latest"]
        );
        assert_eq!(
            fallbacks_for("codestral-latest"),
            vec!["claude-3-5-sonnet-latest", "gpt-4o", "gemini-1.5-pro"]
        );
        assert_eq!(
            fallbacks_for("gpt-4o"),
            vec!["claude-3-5-sonnet-latest", "gemini-1.5-pro", "mistral-large-latest"]
        );
        assert_eq!(
            fallbacks_for("claude-3-opus-latest"),
            vec!["gpt-4o", "claude-3-5-sonnet-latest", "gemini-1.5-pro", "mistral-large-latest"]
        );
    }

    #[test]
    fn test_resolve_chain_skips_unusable_providers() {
        let picked = resolve_chain("coding", |m| m.provider != ProviderId::Anthropic).unwrap();
        assert_eq!(picked.id, "gpt-4o");

        // pixtral is under maintenance.
        assert!(resolve_chain("vision", |m| m.provider == ProviderId::Mistral).is_none());

        let none = resolve_chain("long-context", |_| false);
        assert!(none.is_none());
        assert!(resolve_chain("poetry", |_| true).is_none());
    }

    #[test]
    fn test_capability_parsing() {
        assert_eq!("long_context".parse::<Capability>().unwrap(), Capability::LongContext);
        assert_eq!("Coding".parse::<Capability>().unwrap(), Capability::Code);
        assert!("telepathy".parse::<Capability>().is_err());
    }

    #[test]
    fn test_factory_requires_key() {
        let mut providers = ProvidersConfig::default();
        providers.gemini.enabled = false;
        let err = create_provider_adapter(ProviderId::Gemini, &providers, &RetryPolicy::default())
            .err()
            .unwrap();
        assert!(matches!(err, ChatError::ProviderNotConfigured(ProviderId::Gemini)));
    }

    #[test]
    fn test_factory_dispatches_by_provider() {
        let mut config = ChatmuxConfig::default();
        config.providers.anthropic.api_key = Some("sk-ant".into());
        config.providers.mistral.api_key = Some("ms-key".into());
        config.providers.mistral.base_url = Some("http://127.0.0.1:9/v1".into());
        for provider in [ProviderId::OpenAi, ProviderId::Gemini] {
            config.providers.get_mut(provider).enabled = false;
        }

        let registry = ModelRegistry::from_config(&config);
        assert_eq!(
            registry.configured_providers(),
            vec![ProviderId::Anthropic, ProviderId::Mistral]
        );

        let (entry, adapter) = registry.adapter_for_model("codestral-latest").unwrap();
        assert_eq!(entry.provider, ProviderId::Mistral);
        assert_eq!(adapter.provider(), ProviderId::Mistral);

        assert!(matches!(
            registry.adapter_for_model("gpt-4o").err().unwrap(),
            ChatError::ProviderNotConfigured(ProviderId::OpenAi)
        ));
        assert!(matches!(
            registry.adapter_for_model("nope").err().unwrap(),
            ChatError::UnknownModel(_)
        ));
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let mut providers = ProvidersConfig::default();
        providers.openai.api_key = Some("sk".into());
        providers.openai.base_url = Some("not a url".into());
        let err = create_provider_adapter(ProviderId::OpenAi, &providers, &RetryPolicy::default())
            .err()
            .unwrap();
        assert!(matches!(err, ChatError::Provider(_)));
    }

    #[tokio::test]
    async fn test_configured_base_url_reaches_provider() {
        use chatmux_adapters::{ChatMessage, ModelRequest};
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "choices": [{"message": {"role": "assistant", "content": "pong"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 4, "completion_tokens": 1, "total_tokens": 5}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = ChatmuxConfig::default();
        config.providers.openai.api_key = Some("sk-test".into());
        config.providers.openai.base_url = Some(format!("{}/v1", server.uri()));
        let registry = ModelRegistry::from_config(&config);

        let (_, adapter) = registry.adapter_for_model("gpt-4o-mini").unwrap();
        let request = ModelRequest::new("gpt-4o-mini").message(ChatMessage::user("ping"));
        let response = adapter.request(&request).await.unwrap();

        assert_eq!(response.text, "pong");
        assert_eq!(response.tokens.map(|t| t.total), Some(5));
    }
}
