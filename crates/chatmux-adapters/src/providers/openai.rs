//! OpenAI chat completions.

use reqwest::RequestBuilder;

use super::openai_compat::{self, Dialect, RATE_LIMIT_HEADERS};
use crate::client::{HttpAdapter, WireFormat};
use crate::error::ProviderResult;
use crate::message::ModelRequest;
use crate::provider::ProviderId;
use crate::response::{ModelResponse, StreamDelta};
use crate::transport::http::RateLimitHeaders;

const DIALECT: Dialect = Dialect {
    include_stream_usage: true,
    nested_image_url: true,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiWire;

/// Adapter for `api.openai.com`.
pub type OpenAiAdapter = HttpAdapter<OpenAiWire>;

impl WireFormat for OpenAiWire {
    const PROVIDER: ProviderId = ProviderId::OpenAi;

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
    use crate::health::HealthStatus;
    use crate::message::ChatMessage;
    use crate::response::{FinishReason, TokenUsage};
    use crate::retry::RetryPolicy;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            backoff_factor: 2.0,
        }
    }

    fn adapter(server: &MockServer) -> OpenAiAdapter {
        OpenAiAdapter::new("sk-test")
            .unwrap()
            .with_base_url(&server.uri())
            .unwrap()
            .with_retry_policy(fast_retry())
    }

    fn hello() -> ModelRequest {
        ModelRequest::new("gpt-4o-mini").message(ChatMessage::user("Say hello"))
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let err = OpenAiAdapter::new("  ").unwrap_err();
        assert!(matches!(err, ProviderError::Auth { .. }));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_request_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini", "stream": false})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ratelimit-limit-requests", "500")
                    .insert_header("x-ratelimit-remaining-requests", "499")
                    .set_body_json(json!({
                        "model": "gpt-4o-mini-2024-07-18",
                        "choices": [{
                            "message": {"role": "assistant", "content": "Hello!"},
                            "finish_reason": "stop"
                        }],
                        "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = adapter(&server).request(&hello()).await.unwrap();
        assert_eq!(response.text, "Hello!");
        assert_eq!(response.tokens, Some(TokenUsage::new(10, 2)));
        assert_eq!(response.metadata.model, "gpt-4o-mini-2024-07-18");
        assert_eq!(response.metadata.finish_reason, Some(FinishReason::Stop));
        let quota = response.metadata.rate_limit.unwrap();
        assert_eq!(quota.limit, Some(500));
        assert_eq!(quota.remaining, Some(499));
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = adapter(&server).request(&hello()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Auth { .. }));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Incorrect API key"));
    }

    #[tokio::test]
    async fn test_rate_limit_reports_reset_time() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "60"))
            .mount(&server)
            .await;

        let before = Utc::now();
        let err = adapter(&server)
            .with_retry_policy(RetryPolicy::none())
            .request(&hello())
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::RateLimit { .. }));
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(60)));
        let reset = err.reset_time().unwrap();
        let delta = (reset - before).num_seconds();
        assert!((59..=61).contains(&delta), "reset {delta}s from now");
    }

    #[tokio::test]
    async fn test_server_error_is_retried_up_to_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .expect(3)
            .mount(&server)
            .await;

        let err = adapter(&server).request(&hello()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Server { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "model not found"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = adapter(&server).request(&hello()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unknown { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_stream_delivers_each_delta_once() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n",
            "data: [DONE]\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("accept", "text/event-stream"))
            .and(body_partial_json(json!({"stream": true, "stream_options": {"include_usage": true}})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut chunks = Vec::new();
        let mut sink = |text: &str| chunks.push(text.to_string());
        let outcome = adapter(&server).stream(&hello(), &mut sink).await.unwrap();

        assert_eq!(chunks, vec!["Hello".to_string(), " world".to_string()]);
        assert_eq!(outcome.metadata.model, "gpt-4o-mini");
        assert_eq!(outcome.tokens, None);
    }

    #[tokio::test]
    async fn test_stream_collects_trailing_usage() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"model\":\"gpt-4o-mini-2024-07-18\",\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"length\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":1,\"total_tokens\":5}}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let mut chunks = Vec::new();
        let mut sink = |text: &str| chunks.push(text.to_string());
        let outcome = adapter(&server).stream(&hello(), &mut sink).await.unwrap();

        assert_eq!(chunks, vec!["Hi".to_string()]);
        assert_eq!(outcome.tokens, Some(TokenUsage::new(4, 1)));
        assert_eq!(outcome.metadata.finish_reason, Some(FinishReason::Length));
        assert_eq!(outcome.metadata.model, "gpt-4o-mini-2024-07-18");
    }

    #[tokio::test]
    async fn test_invalid_request_fails_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let request = hello().temperature(3.5);
        let err = adapter(&server).request(&request).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_models_and_key_validation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [{"id": "gpt-4o"}, {"id": "gpt-4o-mini"}]
            })))
            .mount(&server)
            .await;

        let adapter = adapter(&server);
        assert_eq!(adapter.models().await.unwrap(), vec!["gpt-4o", "gpt-4o-mini"]);
        assert!(adapter.validate_api_key().await.unwrap());
    }

    #[tokio::test]
    async fn test_rejected_key_validates_false() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(!adapter(&server).validate_api_key().await.unwrap());
    }

    #[tokio::test]
    async fn test_models_maps_other_failures_to_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = adapter(&server).models().await.unwrap_err();
        assert!(matches!(err, ProviderError::Server { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ratelimit-remaining-requests", "0")
                    .set_body_json(json!({"data": []})),
            )
            .mount(&server)
            .await;

        let health = adapter(&server).health_check().await;
        assert_eq!(health.provider, ProviderId::OpenAi);
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_health_check_reports_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let health = adapter(&server).health_check().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.error.as_deref(), Some("HTTP 503"));
    }
}
