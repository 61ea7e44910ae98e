//! Provider error taxonomy.
//!
//! Every adapter maps its upstream failures onto [`ProviderError`], so the
//! retry loop, the circuit breaker and the UI can reason about failures
//! without knowing which vendor produced them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::ProviderId;

/// Coarse failure category shared by all providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing credentials.
    Auth,
    /// Upstream quota exhausted.
    RateLimit,
    /// Upstream 5xx.
    Server,
    /// Connectivity or transport failure.
    Network,
    /// The request was rejected before it left the process.
    Validation,
    /// Anything else; presumed to be a client-side defect.
    Unknown,
}

impl ErrorKind {
    /// Whether an identical request may succeed later.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::Server | ErrorKind::Network
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Server => "server",
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by model adapters.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Credentials missing, invalid or lacking permission (HTTP 401/403).
    #[error("{provider} authentication failed: {message}")]
    Auth {
        provider: ProviderId,
        message: String,
    },

    /// The provider throttled the request (HTTP 429).
    #[error("{provider} rate limit exceeded (retry after {}s): {message}", .retry_after.as_secs())]
    RateLimit {
        provider: ProviderId,
        message: String,
        retry_after: Duration,
        reset_time: DateTime<Utc>,
    },

    /// Upstream server failure (HTTP >= 500).
    #[error("{provider} server error {status}: {message}")]
    Server {
        provider: ProviderId,
        status: u16,
        message: String,
    },

    /// The request never produced an HTTP response, or the body broke mid-read.
    #[error("{provider} network error: {message}")]
    Network {
        provider: ProviderId,
        message: String,
    },

    /// The request was malformed and was not sent.
    #[error("{provider} rejected request: {message}")]
    Validation {
        provider: ProviderId,
        message: String,
    },

    /// The provider answered with a body we could not decode.
    #[error("{provider} returned an unreadable response: {source}")]
    Decode {
        provider: ProviderId,
        #[source]
        source: serde_json::Error,
    },

    /// Any other upstream status.
    #[error("{provider} request failed with status {status}: {message}")]
    Unknown {
        provider: ProviderId,
        status: u16,
        message: String,
    },
}

impl ProviderError {
    pub fn auth(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::Auth {
            provider,
            message: message.into(),
        }
    }

    pub fn validation(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::Validation {
            provider,
            message: message.into(),
        }
    }

    /// Wrap a transport error from reqwest.
    pub fn network(provider: ProviderId, err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {err}")
        } else if err.is_connect() {
            format!("connection failed: {err}")
        } else {
            err.to_string()
        };
        Self::Network { provider, message }
    }

    /// Build a rate-limit error that resets `retry_after` from `now`.
    pub fn rate_limited(
        provider: ProviderId,
        message: impl Into<String>,
        retry_after: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let reset_time = chrono::Duration::from_std(retry_after)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);
        Self::RateLimit {
            provider,
            message: message.into(),
            retry_after,
            reset_time,
        }
    }

    pub fn decode(provider: ProviderId, source: serde_json::Error) -> Self {
        Self::Decode { provider, source }
    }

    /// The provider that raised this error.
    pub fn provider(&self) -> ProviderId {
        match self {
            ProviderError::Auth { provider, .. }
            | ProviderError::RateLimit { provider, .. }
            | ProviderError::Server { provider, .. }
            | ProviderError::Network { provider, .. }
            | ProviderError::Validation { provider, .. }
            | ProviderError::Decode { provider, .. }
            | ProviderError::Unknown { provider, .. } => *provider,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Auth { .. } => ErrorKind::Auth,
            ProviderError::RateLimit { .. } => ErrorKind::RateLimit,
            ProviderError::Server { .. } => ErrorKind::Server,
            ProviderError::Network { .. } => ErrorKind::Network,
            ProviderError::Validation { .. } => ErrorKind::Validation,
            ProviderError::Decode { .. } | ProviderError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Wait disclosed by the provider, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimit { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// When the provider's quota resets, if it told us.
    pub fn reset_time(&self) -> Option<DateTime<Utc>> {
        match self {
            ProviderError::RateLimit { reset_time, .. } => Some(*reset_time),
            _ => None,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Auth { .. } => "invalid_api_key",
            ProviderError::RateLimit { .. } => "rate_limit_exceeded",
            ProviderError::Server { .. } => "server_error",
            ProviderError::Network { .. } => "network_error",
            ProviderError::Validation { .. } => "invalid_request",
            ProviderError::Decode { .. } => "invalid_response",
            ProviderError::Unknown { .. } => "unknown_error",
        }
    }

    /// Short text suitable for a toast in the chat UI.
    pub fn user_message(&self) -> String {
        let name = self.provider().display_name();
        match self {
            ProviderError::Auth { .. } => {
                format!("{name} rejected the API key. Check your credentials.")
            }
            ProviderError::RateLimit { retry_after, .. } => format!(
                "{name} is rate limiting requests. Try again in {} seconds.",
                retry_after.as_secs().max(1)
            ),
            ProviderError::Server { .. } => {
                format!("{name} is having trouble right now. Please try again.")
            }
            ProviderError::Network { .. } => {
                format!("Could not reach {name}. Check your connection.")
            }
            ProviderError::Validation { message, .. } => format!("Invalid request: {message}"),
            ProviderError::Decode { .. } | ProviderError::Unknown { .. } => {
                format!("{name} request failed: {self}")
            }
        }
    }

    /// Serializable summary attached to failed chat turns.
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code().to_string(),
            kind: self.kind(),
            retryable: self.is_retryable(),
            message: self.user_message(),
        }
    }
}

/// The `error` half of a normalized response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub retryable: bool,
    pub message: String,
}

/// Adapter result type alias.
pub type ProviderResult<T> = Result<T, ProviderError>;
