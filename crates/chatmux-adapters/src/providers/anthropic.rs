//! Anthropic Messages API.
//!
//! Differences from the chat-completions shape handled here:
//! - the system prompt travels in a top-level `system` field;
//! - `max_tokens` is mandatory;
//! - temperature tops out at 1.0 and penalties are not supported;
//! - streaming uses typed events (`message_start`, `content_block_delta`, ...).

use chrono::Utc;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};

use crate::client::{HttpAdapter, WireFormat};
use crate::error::{ProviderError, ProviderResult};
use crate::message::{Attachment, ChatMessage, ModelRequest, Role};
use crate::provider::ProviderId;
use crate::response::{FinishReason, ModelResponse, ResponseMetadata, StreamDelta, TokenUsage};
use crate::transport::http::{RateLimitHeaders, DEFAULT_RETRY_AFTER};
use crate::transport::sse::parse_sse_data;

pub const API_VERSION: &str = "2023-06-01";

/// Used when the request leaves `max_tokens` unset.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

const MAX_TEMPERATURE: f32 = 1.0;

const PROVIDER: ProviderId = ProviderId::Anthropic;

#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicWire;

pub type AnthropicAdapter = HttpAdapter<AnthropicWire>;

// ── Request ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: WireContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

fn encode_message(message: &ChatMessage) -> WireMessage {
    let text = message.text_with_files();
    let images: Vec<ContentBlock> = message
        .images()
        .filter_map(|attachment| match attachment {
            Attachment::Image { mime_type, data } => Some(ContentBlock::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: mime_type.clone(),
                    data: data.clone(),
                },
            }),
            Attachment::File { .. } => None,
        })
        .collect();

    let content = if images.is_empty() {
        WireContent::Text(text)
    } else {
        let mut blocks = images;
        blocks.push(ContentBlock::Text { text });
        WireContent::Blocks(blocks)
    };

    WireMessage {
        role: match message.role {
            Role::Assistant => "assistant",
            Role::User | Role::System => "user",
        },
        content,
    }
}

// ── Response ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl From<Usage> for TokenUsage {
    fn from(usage: Usage) -> Self {
        TokenUsage::new(usage.input_tokens, usage.output_tokens)
    }
}

// ── Stream events ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockDelta {
        delta: BlockDelta,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<Usage>,
    },
    MessageStop,
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct BlockDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

impl StreamError {
    fn into_provider_error(self) -> ProviderError {
        match self.kind.as_str() {
            "authentication_error" | "permission_error" => ProviderError::auth(PROVIDER, self.message),
            "rate_limit_error" => {
                ProviderError::rate_limited(PROVIDER, self.message, DEFAULT_RETRY_AFTER, Utc::now())
            }
            "overloaded_error" => ProviderError::Server {
                provider: PROVIDER,
                status: 529,
                message: self.message,
            },
            "api_error" => ProviderError::Server {
                provider: PROVIDER,
                status: 500,
                message: self.message,
            },
            "invalid_request_error" => ProviderError::validation(PROVIDER, self.message),
            _ => ProviderError::Unknown {
                provider: PROVIDER,
                status: 0,
                message: format!("{}: {}", self.kind, self.message),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    id: String,
}

impl WireFormat for AnthropicWire {
    const PROVIDER: ProviderId = PROVIDER;

    fn authorize(&self, builder: RequestBuilder, api_key: &str) -> RequestBuilder {
        builder
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
    }

    fn models_path(&self) -> &'static str {
        "v1/models"
    }

    fn parse_models(&self, body: &str) -> ProviderResult<Vec<String>> {
        let list: ModelList = serde_json::from_str(body).map_err(|e| ProviderError::decode(PROVIDER, e))?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    fn chat_path(&self, _model: &str, _stream: bool) -> String {
        "v1/messages".into()
    }

    fn encode_request(&self, request: &ModelRequest, stream: bool) -> ProviderResult<serde_json::Value> {
        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: request.conversation().map(encode_message).collect(),
            system: request.system_prompt(),
            temperature: request.temperature.map(|t| t.min(MAX_TEMPERATURE)),
            top_p: request.top_p,
            stream,
        };
        serde_json::to_value(&body)
            .map_err(|e| ProviderError::validation(PROVIDER, format!("could not encode request: {e}")))
    }

    fn decode_response(&self, body: &str, request: &ModelRequest) -> ProviderResult<ModelResponse> {
        let message: MessagesResponse =
            serde_json::from_str(body).map_err(|e| ProviderError::decode(PROVIDER, e))?;

        let text = message
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<String>();

        let mut metadata =
            ResponseMetadata::new(PROVIDER, message.model.unwrap_or_else(|| request.model.clone()));
        metadata.finish_reason = message.stop_reason.as_deref().map(FinishReason::from_provider);

        Ok(ModelResponse {
            text,
            tokens: message.usage.map(TokenUsage::from),
            metadata,
        })
    }

    fn decode_event(&self, data: &str) -> ProviderResult<StreamDelta> {
        let event: StreamEvent = parse_sse_data(PROVIDER, data)?;
        Ok(match event {
            StreamEvent::MessageStart { message } => StreamDelta {
                model: message.model,
                usage: message.usage.map(TokenUsage::from),
                ..Default::default()
            },
            StreamEvent::ContentBlockDelta { delta } => StreamDelta {
                text: delta.text,
                ..Default::default()
            },
            StreamEvent::MessageDelta { delta, usage } => StreamDelta {
                finish_reason: delta.stop_reason.as_deref().map(FinishReason::from_provider),
                usage: usage.map(TokenUsage::from),
                ..Default::default()
            },
            StreamEvent::MessageStop => StreamDelta::done(),
            StreamEvent::Error { error } => return Err(error.into_provider_error()),
            StreamEvent::Other => StreamDelta::default(),
        })
    }

    fn rate_limit_headers(&self) -> Option<RateLimitHeaders> {
        Some(RateLimitHeaders {
            limit: "anthropic-ratelimit-requests-limit",
            remaining: "anthropic-ratelimit-requests-remaining",
            reset: "anthropic-ratelimit-requests-reset",
        })
    }
}
