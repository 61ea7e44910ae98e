//! # chatmux-core
//!
//! Everything between a chat UI and the provider adapters:
//! - Token-bucket rate limiting per provider and session
//! - Circuit breaking per provider
//! - A model catalog with fallback chains and an adapter factory
//! - Cached provider health probes
//! - A chat orchestrator that streams replies and falls back across providers
//! - Configuration and telemetry
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chatmux_core::{ChatEvent, ChatOrchestrator, ChatmuxConfig, ResilienceContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ChatmuxConfig::load()?;
//!     let chat = ChatOrchestrator::from_config(&config, Arc::new(ResilienceContext::new()));
//!
//!     let reply = chat
//!         .send_message("Summarize the plot of Hamlet.", vec![], |event| {
//!             if let ChatEvent::Delta(text) = event {
//!                 print!("{text}");
//!             }
//!         })
//!         .await?;
//!     println!("\n[{}]", reply.model.unwrap_or_default());
//!     Ok(())
//! }
//! ```

pub mod breaker;
pub mod chat;
pub mod config;
pub mod error;
pub mod health;
pub mod ratelimit;
pub mod registry;
pub mod resilience;
pub mod telemetry;

#[cfg(test)]
mod testing;

// Re-exports
pub use breaker::{BreakerError, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use chat::{ChatEvent, ChatOrchestrator, ConversationMessage, MessageStatus, SettingsSource};
pub use config::{
    ChatSettings, ChatmuxConfig, CircuitBreakerConfig, HealthConfig, ProviderConfig, ProvidersConfig,
    RateLimitConfig, RateLimitsConfig, TelemetryConfig,
};
pub use error::{ChatError, ChatResult};
pub use health::HealthMonitor;
pub use ratelimit::{ProviderRateLimiter, RateLimitDecision, RateLimitStatus, TokenBucket};
pub use registry::{Capability, FallbackChain, ModelEntry, ModelRegistry, ModelStatus};
pub use resilience::ResilienceContext;

// Re-export the adapter layer for convenience
pub use chatmux_adapters;
