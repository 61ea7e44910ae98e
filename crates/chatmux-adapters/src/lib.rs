//! # chatmux-adapters
//!
//! One request/response contract over the chat APIs of OpenAI, Anthropic,
//! Google Gemini and Mistral.
//!
//! Every provider is exposed as a [`ModelAdapter`]: the same
//! [`ModelRequest`] goes in, the same [`ModelResponse`] (or streamed text
//! deltas plus a [`StreamOutcome`]) comes out, and every failure is one of
//! the [`ProviderError`] variants. Retryable failures are retried with
//! exponential backoff according to the adapter's [`RetryPolicy`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatmux_adapters::{ChatMessage, ModelAdapter, ModelRequest, OpenAiAdapter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = OpenAiAdapter::from_env()?;
//!     let request = ModelRequest::new("gpt-4o-mini")
//!         .message(ChatMessage::system("Answer in one sentence."))
//!         .message(ChatMessage::user("Why is the sky blue?"));
//!
//!     let mut print = |delta: &str| print!("{delta}");
//!     let outcome = adapter.stream(&request, &mut print).await?;
//!     println!("\n[{} tokens]", outcome.tokens.map_or(0, |t| t.total));
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod client;
pub mod error;
pub mod health;
pub mod message;
pub mod provider;
pub mod providers;
pub mod response;
pub mod retry;
pub mod transport;

// Re-export primary types
pub use adapter::{ChunkSink, ModelAdapter};
pub use client::{HttpAdapter, WireFormat, HEALTH_CHECK_TIMEOUT};
pub use error::{ErrorInfo, ErrorKind, ProviderError, ProviderResult};
pub use health::{HealthStatus, ProviderHealth};
pub use message::{Attachment, ChatMessage, ModelRequest, Role};
pub use provider::{ProviderId, UnknownProvider};
pub use providers::{AnthropicAdapter, GeminiAdapter, MistralAdapter, OpenAiAdapter};
pub use response::{FinishReason, ModelResponse, RateLimitInfo, ResponseMetadata, StreamOutcome, TokenUsage};
pub use retry::RetryPolicy;
