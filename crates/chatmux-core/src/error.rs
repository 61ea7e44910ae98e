//! Error types for the chat layer.

use std::time::Duration;

use chatmux_adapters::{ErrorInfo, ErrorKind, ProviderError, ProviderId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by the orchestrator and the fault-tolerance façade.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The client-side quota for this provider/session is spent.
    #[error("Rate limit exceeded for {provider}. Try again in {} seconds.", wait_secs(.retry_after))]
    RateLimited {
        provider: ProviderId,
        retry_after: Duration,
        reset_time: DateTime<Utc>,
    },

    /// Calls to the provider are being short-circuited after repeated failures.
    #[error("Circuit breaker is open for {provider}. Try again in {} seconds.", wait_secs(.retry_in))]
    CircuitOpen {
        provider: ProviderId,
        retry_in: Duration,
    },

    /// The adapter call itself failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The model id is not in the catalog.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// No API key is available for the provider.
    #[error("{} is not configured (set {})", .0, .0.api_key_env())]
    ProviderNotConfigured(ProviderId),

    #[error("generation timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    /// Generation was cancelled by the caller.
    #[error("generation stopped")]
    Stopped,

    #[error("configuration error: {0}")]
    Config(String),

    /// `retry_message` was called with no user message to resend.
    #[error("no user message to retry")]
    NothingToRetry,
}

fn wait_secs(wait: &Duration) -> u64 {
    wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
}

impl ChatError {
    /// Whether the next model in the fallback chain should be tried.
    ///
    /// Local rate-limit denials are not: they concern the caller's quota,
    /// not the provider's availability.
    pub fn should_fall_back(&self) -> bool {
        match self {
            ChatError::Provider(err) => err.is_retryable(),
            ChatError::CircuitOpen { .. } | ChatError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Serializable summary for display next to a failed turn.
    pub fn info(&self) -> ErrorInfo {
        match self {
            ChatError::Provider(err) => err.info(),
            ChatError::RateLimited { .. } => ErrorInfo {
                code: "rate_limit_exceeded".into(),
                kind: ErrorKind::RateLimit,
                retryable: true,
                message: self.to_string(),
            },
            ChatError::CircuitOpen { .. } | ChatError::Timeout(_) => ErrorInfo {
                code: if matches!(self, ChatError::Timeout(_)) {
                    "timeout".into()
                } else {
                    "circuit_open".into()
                },
                kind: ErrorKind::Server,
                retryable: true,
                message: self.to_string(),
            },
            _ => ErrorInfo {
                code: "chat_error".into(),
                kind: ErrorKind::Validation,
                retryable: false,
                message: self.to_string(),
            },
        }
    }
}

/// Chat-layer result type alias.
pub type ChatResult<T> = Result<T, ChatError>;
