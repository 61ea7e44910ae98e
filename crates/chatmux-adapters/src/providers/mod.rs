//! Wire formats for each supported provider.

pub mod anthropic;
pub mod gemini;
pub mod mistral;
pub mod openai;
mod openai_compat;

pub use anthropic::{AnthropicAdapter, AnthropicWire};
pub use gemini::{GeminiAdapter, GeminiWire};
pub use mistral::{MistralAdapter, MistralWire};
pub use openai::{OpenAiAdapter, OpenAiWire};
