//! Chat-completions schema shared by OpenAI and Mistral.

use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, ProviderResult};
use crate::message::{ChatMessage, ModelRequest};
use crate::provider::ProviderId;
use crate::response::{FinishReason, ModelResponse, ResponseMetadata, StreamDelta, TokenUsage};
use crate::transport::http::RateLimitHeaders;
use crate::transport::sse::parse_sse_data;

pub(crate) const RATE_LIMIT_HEADERS: RateLimitHeaders = RateLimitHeaders {
    limit: "x-ratelimit-limit-requests",
    remaining: "x-ratelimit-remaining-requests",
    reset: "x-ratelimit-reset-requests",
};

/// Where the two dialects differ.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Dialect {
    /// Ask for a trailing usage chunk (`stream_options.include_usage`).
    pub include_stream_usage: bool,
    /// `image_url` is `{"url": ...}` rather than a bare string.
    pub nested_image_url: bool,
}

// ── Wire request ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
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
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: serde_json::Value },
}

fn encode_message(message: &ChatMessage, dialect: Dialect) -> WireMessage {
    let text = message.text_with_files();
    let images: Vec<String> = message.images().filter_map(|a| a.data_url()).collect();

    let content = if images.is_empty() {
        WireContent::Text(text)
    } else {
        let mut parts = vec![ContentPart::Text { text }];
        parts.extend(images.into_iter().map(|url| ContentPart::ImageUrl {
            image_url: if dialect.nested_image_url {
                serde_json::json!({ "url": url })
            } else {
                serde_json::Value::String(url)
            },
        }));
        WireContent::Parts(parts)
    };

    WireMessage {
        role: message.role.as_str(),
        content,
    }
}

pub(crate) fn encode_request(
    provider: ProviderId,
    request: &ModelRequest,
    stream: bool,
    dialect: Dialect,
) -> ProviderResult<serde_json::Value> {
    let body = ChatCompletionRequest {
        model: &request.model,
        messages: request
            .messages
            .iter()
            .map(|m| encode_message(m, dialect))
            .collect(),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        top_p: request.top_p,
        frequency_penalty: request.frequency_penalty,
        presence_penalty: request.presence_penalty,
        stream,
        stream_options: (stream && dialect.include_stream_usage)
            .then_some(StreamOptions { include_usage: true }),
    };
    serde_json::to_value(&body)
        .map_err(|e| ProviderError::validation(provider, format!("could not encode request: {e}")))
}

// ── Wire response ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceContent>,
    #[serde(default)]
    delta: Option<ChoiceContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<Usage> for TokenUsage {
    fn from(usage: Usage) -> Self {
        let mut tokens = TokenUsage::new(usage.prompt_tokens, usage.completion_tokens);
        tokens.total = tokens.total.max(usage.total_tokens);
        tokens
    }
}

pub(crate) fn decode_response(
    provider: ProviderId,
    body: &str,
    request: &ModelRequest,
) -> ProviderResult<ModelResponse> {
    let completion: ChatCompletion =
        serde_json::from_str(body).map_err(|e| ProviderError::decode(provider, e))?;

    let choice = completion.choices.into_iter().next();
    let finish_reason = choice
        .as_ref()
        .and_then(|c| c.finish_reason.as_deref())
        .map(FinishReason::from_provider);
    let text = choice
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .unwrap_or_default();

    let mut metadata =
        ResponseMetadata::new(provider, completion.model.unwrap_or_else(|| request.model.clone()));
    metadata.finish_reason = finish_reason;

    Ok(ModelResponse {
        text,
        tokens: completion.usage.map(TokenUsage::from),
        metadata,
    })
}

pub(crate) fn decode_event(provider: ProviderId, data: &str) -> ProviderResult<StreamDelta> {
    let chunk: ChatCompletion = parse_sse_data(provider, data)?;
    let choice = chunk.choices.into_iter().next();

    Ok(StreamDelta {
        finish_reason: choice
            .as_ref()
            .and_then(|c| c.finish_reason.as_deref())
            .map(FinishReason::from_provider),
        text: choice.and_then(|c| c.delta).and_then(|d| d.content),
        usage: chunk.usage.map(TokenUsage::from),
        model: chunk.model,
        done: false,
    })
}

// ── Model catalog ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    id: String,
}

pub(crate) fn parse_models(provider: ProviderId, body: &str) -> ProviderResult<Vec<String>> {
    let list: ModelList = serde_json::from_str(body).map_err(|e| ProviderError::decode(provider, e))?;
    Ok(list.data.into_iter().map(|m| m.id).collect())
}
