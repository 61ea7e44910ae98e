//! Chat orchestrator: one conversation, routed through the fault-tolerance
//! façade with fallback across providers.
//!
//! The orchestrator owns the in-memory conversation. Each turn reads the
//! current [`ChatSettings`] from a [`SettingsSource`], calls the selected
//! model's adapter under its provider's rate limit and circuit breaker, and
//! walks the model's fallback chain when the provider fails in a way another
//! provider could recover from.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chatmux_adapters::{
    Attachment, ChatMessage, ErrorInfo, ModelAdapter, ModelRequest, ProviderHealth, ProviderId, Role,
    TokenUsage,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::{ChatSettings, ChatmuxConfig, CircuitBreakerConfig, RateLimitsConfig};
use crate::error::{ChatError, ChatResult};
use crate::health::HealthMonitor;
use crate::registry::{fallbacks_for, get_model, ModelEntry, ModelRegistry};
use crate::resilience::ResilienceContext;

/// Where the orchestrator reads its generation settings from.
pub trait SettingsSource: Send + Sync {
    fn chat_settings(&self) -> ChatSettings;
}

impl SettingsSource for ChatSettings {
    fn chat_settings(&self) -> ChatSettings {
        self.clone()
    }
}

/// Settings that can be changed between turns.
impl SettingsSource for RwLock<ChatSettings> {
    fn chat_settings(&self) -> ChatSettings {
        self.read().clone()
    }
}

/// Progress of a single turn, delivered to the caller as it happens.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A model was selected and the request is about to be sent.
    Started { model: String, provider: ProviderId },
    /// Text produced by the model.
    Delta(String),
    /// `from` failed; text already delivered for it should be discarded.
    FallingBack { from: String, to: String, reason: String },
    Completed { model: String, tokens: Option<TokenUsage> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Complete,
    Stopped,
    Failed,
}

/// One entry of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ConversationMessage {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            attachments: Vec::new(),
            model: None,
            provider: None,
            tokens: None,
            created_at: Utc::now(),
            status: MessageStatus::Complete,
            error: None,
        }
    }

    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            attachments,
            ..Self::new(Role::User, content.into())
        }
    }

    fn as_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
            attachments: self.attachments.clone(),
        }
    }
}

/// Counts a turn as active until it ends, however it ends.
struct ActiveTurn<'a>(&'a AtomicUsize);

impl<'a> ActiveTurn<'a> {
    fn enter(turns: &'a AtomicUsize) -> Self {
        turns.fetch_add(1, Ordering::SeqCst);
        Self(turns)
    }
}

impl Drop for ActiveTurn<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

type EventSink<'a> = &'a mut (dyn FnMut(ChatEvent) + Send);

pub struct ChatOrchestrator {
    settings: Arc<dyn SettingsSource>,
    registry: Arc<ModelRegistry>,
    resilience: Arc<ResilienceContext>,
    health: Arc<HealthMonitor>,
    rate_limits: RateLimitsConfig,
    circuit_breaker: CircuitBreakerConfig,
    session_id: String,
    messages: Mutex<Vec<ConversationMessage>>,
    stop: Notify,
    stop_requested: AtomicBool,
    active_turns: AtomicUsize,
}

impl std::fmt::Debug for ChatOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOrchestrator")
            .field("session_id", &self.session_id)
            .field("registry", &self.registry)
            .field("messages", &self.messages.lock().len())
            .finish()
    }
}

impl ChatOrchestrator {
    pub fn new(
        settings: Arc<dyn SettingsSource>,
        registry: Arc<ModelRegistry>,
        resilience: Arc<ResilienceContext>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            settings,
            registry,
            resilience,
            health,
            rate_limits: RateLimitsConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            session_id: Uuid::new_v4().to_string(),
            messages: Mutex::new(Vec::new()),
            stop: Notify::new(),
            stop_requested: AtomicBool::new(false),
            active_turns: AtomicUsize::new(0),
        }
    }

    /// Wire up registry, health monitor and limits from a loaded config.
    pub fn from_config(config: &ChatmuxConfig, resilience: Arc<ResilienceContext>) -> Self {
        let registry = Arc::new(ModelRegistry::from_config(config));
        let health = Arc::new(HealthMonitor::from_config(registry.clone(), &config.health));
        Self::new(Arc::new(RwLock::new(config.chat.clone())), registry, resilience, health)
            .with_rate_limits(config.rate_limits.clone())
            .with_circuit_breaker(config.circuit_breaker.clone())
    }

    pub fn with_rate_limits(mut self, rate_limits: RateLimitsConfig) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn resilience(&self) -> &Arc<ResilienceContext> {
        &self.resilience
    }

    /// Append a user message and generate the assistant's reply.
    ///
    /// Returns the recorded assistant message. A stopped turn is `Ok` with
    /// [`MessageStatus::Stopped`]; any other failure is recorded as a
    /// [`MessageStatus::Failed`] message and returned as `Err`.
    pub async fn send_message(
        &self,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
        mut on_event: impl FnMut(ChatEvent) + Send,
    ) -> ChatResult<ConversationMessage> {
        self.messages
            .lock()
            .push(ConversationMessage::user(content, attachments));
        self.generate(&mut on_event).await
    }

    /// Drop the trailing assistant reply and generate a new one for the
    /// last user message.
    pub async fn retry_message(
        &self,
        mut on_event: impl FnMut(ChatEvent) + Send,
    ) -> ChatResult<ConversationMessage> {
        {
            let mut messages = self.messages.lock();
            while messages.last().is_some_and(|m| m.role == Role::Assistant) {
                messages.pop();
            }
            if !messages.last().is_some_and(|m| m.role == Role::User) {
                return Err(ChatError::NothingToRetry);
            }
        }
        self.generate(&mut on_event).await
    }

    /// Abort the in-flight generation. Returns `false` if nothing was running.
    pub fn stop_generation(&self) -> bool {
        if !self.is_generating() {
            return false;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();
        true
    }

    pub fn is_generating(&self) -> bool {
        self.active_turns.load(Ordering::SeqCst) > 0
    }

    /// Cached health for one provider, or all of them.
    pub async fn provider_health(&self, provider: Option<ProviderId>) -> Vec<ProviderHealth> {
        match provider {
            Some(provider) => vec![self.health.provider_health(provider).await],
            None => self.health.all_provider_health().await,
        }
    }

    pub fn messages(&self) -> Vec<ConversationMessage> {
        self.messages.lock().clone()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }

    async fn generate(&self, on_event: EventSink<'_>) -> ChatResult<ConversationMessage> {
        if !self.is_generating() {
            self.stop_requested.store(false, Ordering::SeqCst);
        }
        let _turn = ActiveTurn::enter(&self.active_turns);

        let settings = self.settings.chat_settings();
        let request = self.build_request(&settings);
        let candidates = match self.candidates(&settings) {
            Ok(candidates) => candidates,
            Err(err) => return Err(self.record_failure(None, String::new(), err)),
        };

        let mut text = String::new();
        let mut attempts = candidates.iter().peekable();
        while let Some(&(entry, ref adapter)) = attempts.next() {
            text.clear();
            let mut request = request.clone();
            request.model = entry.id.to_string();
            on_event(ChatEvent::Started {
                model: entry.id.to_string(),
                provider: entry.provider,
            });

            let result = self
                .attempt(entry, adapter.as_ref(), &request, &settings, &mut text, on_event)
                .await;

            match result {
                Ok(tokens) => {
                    on_event(ChatEvent::Completed {
                        model: entry.id.to_string(),
                        tokens,
                    });
                    let mut message = ConversationMessage::new(Role::Assistant, text);
                    message.model = Some(entry.id.to_string());
                    message.provider = Some(entry.provider);
                    message.tokens = tokens;
                    return Ok(self.record(message));
                }
                Err(ChatError::Stopped) => {
                    tracing::debug!(model = entry.id, chars = text.len(), "Generation stopped");
                    let mut message = ConversationMessage::new(Role::Assistant, text);
                    message.model = Some(entry.id.to_string());
                    message.provider = Some(entry.provider);
                    message.status = MessageStatus::Stopped;
                    return Ok(self.record(message));
                }
                Err(err) if err.should_fall_back() => match attempts.peek() {
                    Some((next, _)) => {
                        tracing::warn!(
                            from = entry.id,
                            to = next.id,
                            error = %err,
                            "Model failed, falling back"
                        );
                        on_event(ChatEvent::FallingBack {
                            from: entry.id.to_string(),
                            to: next.id.to_string(),
                            reason: err.to_string(),
                        });
                    }
                    None => return Err(self.record_failure(Some(entry), text, err)),
                },
                Err(err) => return Err(self.record_failure(Some(entry), text, err)),
            }
        }

        // `candidates` always holds the selected model.
        Err(self.record_failure(None, text, ChatError::UnknownModel(settings.model)))
    }

    /// The selected model followed by its usable fallbacks.
    fn candidates(&self, settings: &ChatSettings) -> ChatResult<Vec<(&'static ModelEntry, Arc<dyn ModelAdapter>)>> {
        let mut candidates = vec![self.registry.adapter_for_model(&settings.model)?];
        if !settings.fallback {
            return Ok(candidates);
        }

        for id in fallbacks_for(&settings.model) {
            let Some(entry) = get_model(id) else { continue };
            let Ok(adapter) = self.registry.adapter(entry.provider) else {
                continue;
            };
            if self
                .health
                .cached(entry.provider)
                .is_some_and(|h| !h.is_usable())
            {
                tracing::debug!(model = id, provider = %entry.provider, "Skipping unhealthy fallback");
                continue;
            }
            candidates.push((entry, adapter));
        }
        Ok(candidates)
    }

    fn build_request(&self, settings: &ChatSettings) -> ModelRequest {
        let history: Vec<ChatMessage> = self
            .messages
            .lock()
            .iter()
            .filter(|m| m.status != MessageStatus::Failed && !m.content.is_empty())
            .map(ConversationMessage::as_chat_message)
            .collect();

        let mut request = ModelRequest::new(&settings.model)
            .messages(settings.system_prompt.iter().map(ChatMessage::system))
            .messages(history);
        request.temperature = settings.temperature;
        request.max_tokens = settings.max_tokens;
        request
    }

    /// One model, through the façade, raced against stop and timeout.
    async fn attempt(
        &self,
        entry: &ModelEntry,
        adapter: &dyn ModelAdapter,
        request: &ModelRequest,
        settings: &ChatSettings,
        text: &mut String,
        on_event: EventSink<'_>,
    ) -> ChatResult<Option<TokenUsage>> {
        let stopped = self.stop.notified();
        if self.stop_requested.load(Ordering::SeqCst) {
            return Err(ChatError::Stopped);
        }

        let provider = entry.provider;
        let key = format!("{provider}:{}", self.session_id);
        let streaming = settings.streaming;
        let timeout = settings.request_timeout();

        let call = self.resilience.with_fault_tolerance(
            provider,
            self.rate_limits.get(provider),
            &self.circuit_breaker,
            &key,
            1,
            move || async move {
                if streaming {
                    let mut sink = |delta: &str| {
                        text.push_str(delta);
                        on_event(ChatEvent::Delta(delta.to_string()));
                    };
                    adapter.stream(request, &mut sink).await.map(|outcome| outcome.tokens)
                } else {
                    let response = adapter.request(request).await?;
                    text.push_str(&response.text);
                    on_event(ChatEvent::Delta(response.text));
                    Ok(response.tokens)
                }
            },
        );

        let bounded = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ChatError::Timeout(limit)),
                },
                None => call.await,
            }
        };

        tokio::select! {
            result = bounded => result,
            _ = stopped => Err(ChatError::Stopped),
        }
    }

    fn record(&self, message: ConversationMessage) -> ConversationMessage {
        self.messages.lock().push(message.clone());
        message
    }

    fn record_failure(&self, entry: Option<&ModelEntry>, text: String, err: ChatError) -> ChatError {
        tracing::warn!(error = %err, "Chat turn failed");
        let mut message = ConversationMessage::new(Role::Assistant, text);
        message.model = entry.map(|e| e.id.to_string());
        message.provider = entry.map(|e| e.provider);
        message.status = MessageStatus::Failed;
        message.error = Some(err.info());
        self.record(message);
        err
    }
}
