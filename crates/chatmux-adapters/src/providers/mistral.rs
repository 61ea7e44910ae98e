//! Mistral chat completions (OpenAI-compatible schema).

use reqwest::RequestBuilder;

use super::openai_compat::{self, Dialect, RATE_LIMIT_HEADERS};
use crate::client::{HttpAdapter, WireFormat};
use crate::error::ProviderResult;
use crate::message::ModelRequest;
use crate::provider::ProviderId;
use crate::response::{ModelResponse, StreamDelta};
use crate::transport::http::RateLimitHeaders;

const DIALECT: Dialect = Dialect {
    include_stream_usage: false,
    nested_image_url: false,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct MistralWire;

pub type MistralAdapter = HttpAdapter<MistralWire>;

impl WireFormat for MistralWire {
    const PROVIDER: ProviderId = ProviderId::Mistral;

    fn authorize(&self, builder: RequestBuilder, api_key: &str) -> RequestBuilder {
        builder.bearer_auth(api_key)
    }

    fn models_path(&self) -> &'static str {
        "models"
    }

    fn parse_models(&self, body: &str) -> ProviderResult<Vec<String>> {
        openai_compat::parse_models(Self::PROVIDER, body)
    }

    fn chat_path(&self, _model: &str, _stream: bool) -> String {
        "chat/completions".into()
    }

    fn encode_request(&self, request: &ModelRequest, stream: bool) -> ProviderResult<serde_json::Value> {
        openai_compat::encode_request(Self::PROVIDER, request, stream, DIALECT)
    }

    fn decode_response(&self, body: &str, request: &ModelRequest) -> ProviderResult<ModelResponse> {
        openai_compat::decode_response(Self::PROVIDER, body, request)
    }

    fn decode_event(&self, data: &str) -> ProviderResult<StreamDelta> {
        openai_compat::decode_event(Self::PROVIDER, data)
    }

    fn rate_limit_headers(&self) -> Option<RateLimitHeaders> {
        Some(RATE_LIMIT_HEADERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ModelAdapter;
    use crate::error::ProviderError;
    use crate::message::ChatMessage;
    use crate::response::TokenUsage;
    use crate::retry::RetryPolicy;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> MistralAdapter {
        MistralAdapter::new("mistral-key")
            .unwrap()
            .with_base_url(&server.uri())
            .unwrap()
            .with_retry_policy(RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_streams_through_shared_codec() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"id\":\"1\",\"model\":\"mistral-small-latest\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
            "data: {\"id\":\"1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Bonjour\"}}]}\n\n",
            "data: {\"id\":\"1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"\"},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":1,\"total_tokens\":6}}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer mistral-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let request = ModelRequest::new("mistral-small-latest").message(ChatMessage::user("Salut"));
        let mut chunks = Vec::new();
        let mut sink = |text: &str| chunks.push(text.to_string());
        let outcome = adapter(&server).stream(&request, &mut sink).await.unwrap();

        assert_eq!(chunks, vec!["Bonjour".to_string()]);
        assert_eq!(outcome.tokens, Some(TokenUsage::new(5, 1)));
    }

    #[tokio::test]
    async fn test_stream_request_omits_usage_option() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "mistral-large-latest", "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string("data: [DONE]\n\n"))
            .mount(&server)
            .await;

        let request = ModelRequest::new("mistral-large-latest").message(ChatMessage::user("Hi"));
        let mut sink = |_: &str| {};
        adapter(&server).stream(&request, &mut sink).await.unwrap();

        let received = server.received_requests().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert!(sent.get("stream_options").is_none());
    }

    #[tokio::test]
    async fn test_forbidden_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "Forbidden"})))
            .mount(&server)
            .await;

        let request = ModelRequest::new("mistral-small-latest").message(ChatMessage::user("Hi"));
        let err = adapter(&server).request(&request).await.unwrap_err();
        assert!(matches!(err, ProviderError::Auth { .. }));
        assert_eq!(err.provider(), ProviderId::Mistral);
    }
}
