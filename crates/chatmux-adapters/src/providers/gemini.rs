//! Google Gemini `generateContent`.

use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};

use crate::client::{HttpAdapter, WireFormat};
use crate::error::{ProviderError, ProviderResult};
use crate::message::{Attachment, ChatMessage, ModelRequest, Role};
use crate::provider::ProviderId;
use crate::response::{FinishReason, ModelResponse, ResponseMetadata, StreamDelta, TokenUsage};
use crate::transport::sse::parse_sse_data;

const PROVIDER: ProviderId = ProviderId::Gemini;

const MODEL_PREFIX: &str = "models/";

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiWire;

pub type GeminiAdapter = HttpAdapter<GeminiWire>;

// ── Request ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
}

fn text_part(text: String) -> Part {
    Part {
        text: Some(text),
        inline_data: None,
    }
}

fn encode_message(message: &ChatMessage) -> Content {
    let mut parts = vec![text_part(message.text_with_files())];
    parts.extend(message.images().filter_map(|attachment| match attachment {
        Attachment::Image { mime_type, data } => Some(Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.clone(),
                data: data.clone(),
            }),
        }),
        Attachment::File { .. } => None,
    }));

    Content {
        role: Some(match message.role {
            Role::Assistant => "model".into(),
            Role::User | Role::System => "user".into(),
        }),
        parts,
    }
}

// ── Response ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl From<UsageMetadata> for TokenUsage {
    fn from(usage: UsageMetadata) -> Self {
        let mut tokens = TokenUsage::new(usage.prompt_token_count, usage.candidates_token_count);
        tokens.total = tokens.total.max(usage.total_token_count);
        tokens
    }
}

impl GenerateContentResponse {
    /// Text of the first candidate, parts concatenated.
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content.parts.iter().filter_map(|p| p.text.as_deref()).collect();
        Some(text)
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .filter(|r| *r != "FINISH_REASON_UNSPECIFIED")
            .map(FinishReason::from_provider)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelInfo {
    name: String,
    #[serde(default)]
    supported_generation_methods: Option<Vec<String>>,
}

impl WireFormat for GeminiWire {
    const PROVIDER: ProviderId = PROVIDER;

    fn authorize(&self, builder: RequestBuilder, api_key: &str) -> RequestBuilder {
        builder.header("x-goog-api-key", api_key)
    }

    fn models_path(&self) -> &'static str {
        "v1beta/models"
    }

    /// Chat-capable models only, without the `models/` prefix.
    fn parse_models(&self, body: &str) -> ProviderResult<Vec<String>> {
        let list: ModelList = serde_json::from_str(body).map_err(|e| ProviderError::decode(PROVIDER, e))?;
        Ok(list
            .models
            .into_iter()
            .filter(|m| {
                m.supported_generation_methods
                    .as_ref()
                    .map_or(true, |methods| methods.iter().any(|x| x == "generateContent"))
            })
            .map(|m| m.name.trim_start_matches(MODEL_PREFIX).to_string())
            .collect())
    }

    fn chat_path(&self, model: &str, stream: bool) -> String {
        let model = model.trim_start_matches(MODEL_PREFIX);
        if stream {
            format!("v1beta/models/{model}:streamGenerateContent?alt=sse")
        } else {
            format!("v1beta/models/{model}:generateContent")
        }
    }

    fn encode_request(&self, request: &ModelRequest, _stream: bool) -> ProviderResult<serde_json::Value> {
        let config = GenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
            top_p: request.top_p,
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
        };
        let body = GenerateContentRequest {
            contents: request.conversation().map(encode_message).collect(),
            system_instruction: request.system_prompt().map(|prompt| Content {
                role: None,
                parts: vec![text_part(prompt)],
            }),
            generation_config: (config != GenerationConfig::default()).then_some(config),
        };
        serde_json::to_value(&body)
            .map_err(|e| ProviderError::validation(PROVIDER, format!("could not encode request: {e}")))
    }

    fn decode_response(&self, body: &str, request: &ModelRequest) -> ProviderResult<ModelResponse> {
        let response: GenerateContentResponse =
            serde_json::from_str(body).map_err(|e| ProviderError::decode(PROVIDER, e))?;

        let text = response.text().unwrap_or_default();
        let finish_reason = response.finish_reason();
        let mut metadata = ResponseMetadata::new(
            PROVIDER,
            response.model_version.unwrap_or_else(|| request.model.clone()),
        );
        metadata.finish_reason = finish_reason;

        Ok(ModelResponse {
            text,
            tokens: response.usage_metadata.map(TokenUsage::from),
            metadata,
        })
    }

    fn decode_event(&self, data: &str) -> ProviderResult<StreamDelta> {
        let chunk: GenerateContentResponse = parse_sse_data(PROVIDER, data)?;
        Ok(StreamDelta {
            text: chunk.text(),
            finish_reason: chunk.finish_reason(),
            usage: chunk.usage_metadata.map(TokenUsage::from),
            model: chunk.model_version,
            done: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ModelAdapter;
    use crate::retry::RetryPolicy;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> GeminiAdapter {
        GeminiAdapter::new("AIza-test")
            .unwrap()
            .with_base_url(&server.uri())
            .unwrap()
            .with_retry_policy(RetryPolicy::none())
    }

    #[test]
    fn test_chat_path_strips_prefix() {
        assert_eq!(
            GeminiWire.chat_path("models/gemini-1.5-pro", false),
            "v1beta/models/gemini-1.5-pro:generateContent"
        );
        assert_eq!(
            GeminiWire.chat_path("gemini-1.5-flash", true),
            "v1beta/models/gemini-1.5-flash:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn test_encode_maps_roles_and_config() {
        let request = ModelRequest::new("gemini-1.5-flash")
            .message(ChatMessage::system("Answer in French."))
            .message(ChatMessage::user("Hi"))
            .message(ChatMessage::assistant("Salut"))
            .message(ChatMessage::user("Thanks").with_attachment(Attachment::image("image/png", &[1, 2])))
            .max_tokens(64);

        let body = GeminiWire.encode_request(&request, false).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "Hi"}]},
                    {"role": "model", "parts": [{"text": "Salut"}]},
                    {"role": "user", "parts": [
                        {"text": "Thanks"},
                        {"inline_data": {"mime_type": "image/png", "data": "AQI="}}
                    ]}
                ],
                "systemInstruction": {"parts": [{"text": "Answer in French."}]},
                "generationConfig": {"maxOutputTokens": 64}
            })
        );
    }

    #[test]
    fn test_generation_config_omitted_when_unset() {
        let request = ModelRequest::new("gemini-1.5-flash").message(ChatMessage::user("Hi"));
        let body = GeminiWire.encode_request(&request, false).unwrap();
        assert!(body.get("generationConfig").is_none());
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn test_parse_models_filters_non_chat() {
        let body = json!({
            "models": [
                {"name": "models/gemini-1.5-pro", "supportedGenerationMethods": ["generateContent", "countTokens"]},
                {"name": "models/text-embedding-004", "supportedGenerationMethods": ["embedContent"]}
            ]
        })
        .to_string();
        assert_eq!(GeminiWire.parse_models(&body).unwrap(), vec!["gemini-1.5-pro"]);
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .and(header("x-goog-api-key", "AIza-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "Bonjour"}, {"text": "!"}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5},
                "modelVersion": "gemini-1.5-flash-002"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = ModelRequest::new("gemini-1.5-flash").message(ChatMessage::user("Hello"));
        let response = adapter(&server).request(&request).await.unwrap();

        assert_eq!(response.text, "Bonjour!");
        assert_eq!(response.tokens, Some(TokenUsage::new(3, 2)));
        assert_eq!(response.metadata.model, "gemini-1.5-flash-002");
        assert_eq!(response.metadata.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn test_stream_ends_at_eof() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"One\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\" two\"}]},\"finishReason\":\"STOP\"}],",
            "\"usageMetadata\":{\"promptTokenCount\":2,\"candidatesTokenCount\":2,\"totalTokenCount\":4}}",
        );
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let request = ModelRequest::new("gemini-1.5-flash").message(ChatMessage::user("Count"));
        let mut chunks = Vec::new();
        let mut sink = |text: &str| chunks.push(text.to_string());
        let outcome = adapter(&server).stream(&request, &mut sink).await.unwrap();

        assert_eq!(chunks, vec!["One".to_string(), " two".to_string()]);
        assert_eq!(outcome.tokens, Some(TokenUsage::new(2, 2)));
        assert_eq!(outcome.metadata.finish_reason, Some(FinishReason::Stop));
    }
}
