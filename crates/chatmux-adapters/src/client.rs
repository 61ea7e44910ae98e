//! HTTP adapter: the request/stream/health machinery every provider shares.
//!
//! A provider only describes its wire format through [`WireFormat`]; the
//! [`HttpAdapter`] owns the HTTP client, credentials, retry loop, SSE
//! decoding and error mapping.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Client, RequestBuilder, Response};
use url::Url;

use crate::adapter::{ChunkSink, ModelAdapter};
use crate::error::{ProviderError, ProviderResult};
use crate::health::ProviderHealth;
use crate::message::ModelRequest;
use crate::provider::ProviderId;
use crate::response::{ModelResponse, RateLimitInfo, StreamDelta, StreamOutcome};
use crate::retry::RetryPolicy;
use crate::transport::http::{check_status, classify_status, error_message, extract_rate_limit, RateLimitHeaders};
use crate::transport::sse::{SseDecoder, SseFrame};

/// Timeout applied to health probes.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// A provider's request/response schema.
pub trait WireFormat: Default + Send + Sync + 'static {
    /// Provider served by this format.
    const PROVIDER: ProviderId;

    /// Attach credentials to an outgoing request.
    fn authorize(&self, builder: RequestBuilder, api_key: &str) -> RequestBuilder;

    /// Path of the model catalog, relative to the base URL.
    fn models_path(&self) -> &'static str;

    fn parse_models(&self, body: &str) -> ProviderResult<Vec<String>>;

    /// Path of the completion endpoint, relative to the base URL.
    fn chat_path(&self, model: &str, stream: bool) -> String;

    fn encode_request(&self, request: &ModelRequest, stream: bool) -> ProviderResult<serde_json::Value>;

    fn decode_response(&self, body: &str, request: &ModelRequest) -> ProviderResult<ModelResponse>;

    /// Decode one SSE `data:` payload.
    fn decode_event(&self, data: &str) -> ProviderResult<StreamDelta>;

    fn rate_limit_headers(&self) -> Option<RateLimitHeaders> {
        None
    }
}

/// A [`ModelAdapter`] speaking `W` over HTTP.
#[derive(Clone)]
pub struct HttpAdapter<W: WireFormat> {
    wire: W,
    api_key: String,
    base_url: String,
    http: Client,
    retry: RetryPolicy,
    health_timeout: Duration,
}

impl<W: WireFormat> std::fmt::Debug for HttpAdapter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAdapter")
            .field("provider", &W::PROVIDER)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("retry", &self.retry)
            .finish()
    }
}

impl<W: WireFormat> HttpAdapter<W> {
    /// Create an adapter for the provider's public endpoint.
    ///
    /// Fails with [`ProviderError::Auth`] when the key is empty, so a missing
    /// credential surfaces at startup rather than on the first request.
    pub fn new(api_key: impl Into<String>) -> ProviderResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::auth(
                W::PROVIDER,
                format!("missing API key (set {})", W::PROVIDER.api_key_env()),
            ));
        }
        Ok(Self {
            wire: W::default(),
            api_key,
            base_url: W::PROVIDER.default_base_url().to_string(),
            http: Client::new(),
            retry: RetryPolicy::default(),
            health_timeout: HEALTH_CHECK_TIMEOUT,
        })
    }

    /// Create from the provider's API-key environment variable.
    pub fn from_env() -> ProviderResult<Self> {
        Self::new(std::env::var(W::PROVIDER.api_key_env()).unwrap_or_default())
    }

    /// Point the adapter at a different endpoint (proxy, mock server).
    pub fn with_base_url(mut self, base_url: &str) -> ProviderResult<Self> {
        Url::parse(base_url).map_err(|e| {
            ProviderError::validation(W::PROVIDER, format!("invalid base URL {base_url}: {e}"))
        })?;
        self.base_url = base_url.trim_end_matches('/').to_string();
        Ok(self)
    }

    /// Use a custom HTTP client.
    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    // ── Internal ─────────────────────────────────────────────

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        self.wire.authorize(builder, &self.api_key)
    }

    fn rate_limit_from(&self, headers: &HeaderMap) -> Option<RateLimitInfo> {
        self.wire
            .rate_limit_headers()
            .and_then(|names| extract_rate_limit(headers, &names, Utc::now()))
    }

    /// One attempt at the completion endpoint.
    async fn post_chat(&self, request: &ModelRequest, stream: bool) -> ProviderResult<Response> {
        let body = self.wire.encode_request(request, stream)?;
        let url = self.url(&self.wire.chat_path(&request.model, stream));

        let mut builder = self.authed(self.http.post(&url)).json(&body);
        if stream {
            builder = builder.header(ACCEPT, "text/event-stream");
        }

        tracing::debug!(
            provider = %W::PROVIDER,
            model = %request.model,
            stream,
            "Sending chat request"
        );

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::network(W::PROVIDER, &e))?;
        check_status(W::PROVIDER, response).await
    }

    /// Handle one decoded frame; returns `true` once the stream is over.
    fn apply_frame(
        &self,
        frame: SseFrame,
        outcome: &mut StreamOutcome,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> ProviderResult<bool> {
        match frame {
            SseFrame::Done => Ok(true),
            SseFrame::Data(data) => {
                let delta = self.wire.decode_event(&data)?;
                if let Some(text) = delta.text.as_deref().filter(|t| !t.is_empty()) {
                    on_chunk(text);
                }
                outcome.absorb(&delta);
                Ok(delta.done)
            }
        }
    }
}

#[async_trait]
impl<W: WireFormat> ModelAdapter for HttpAdapter<W> {
    fn provider(&self) -> ProviderId {
        W::PROVIDER
    }

    async fn models(&self) -> ProviderResult<Vec<String>> {
        let response = self
            .authed(self.http.get(self.url(self.wire.models_path())))
            .send()
            .await
            .map_err(|e| ProviderError::network(W::PROVIDER, &e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 | 429 => classify_status(W::PROVIDER, status, &headers, &body, Utc::now()),
                code => ProviderError::Server {
                    provider: W::PROVIDER,
                    status: code,
                    message: error_message(&body).unwrap_or_else(|| status.to_string()),
                },
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::network(W::PROVIDER, &e))?;
        self.wire.parse_models(&body)
    }

    async fn request(&self, request: &ModelRequest) -> ProviderResult<ModelResponse> {
        request.validate(W::PROVIDER)?;

        self.retry
            .run(W::PROVIDER, "request", |_| async move {
                let response = self.post_chat(request, false).await?;
                let rate_limit = self.rate_limit_from(response.headers());
                let body = response
                    .text()
                    .await
                    .map_err(|e| ProviderError::network(W::PROVIDER, &e))?;
                let mut parsed = self.wire.decode_response(&body, request)?;
                parsed.metadata.rate_limit = rate_limit;
                Ok(parsed)
            })
            .await
    }

    async fn stream(
        &self,
        request: &ModelRequest,
        on_chunk: ChunkSink<'_>,
    ) -> ProviderResult<StreamOutcome> {
        request.validate(W::PROVIDER)?;

        // Only establishing the stream is retried; once deltas have been
        // delivered a failure must surface to the caller.
        let response = self
            .retry
            .run(W::PROVIDER, "stream", |_| async move {
                self.post_chat(request, true).await
            })
            .await?;

        let mut outcome = StreamOutcome::new(W::PROVIDER, request.model.clone());
        outcome.metadata.rate_limit = self.rate_limit_from(response.headers());

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        let mut finished = false;

        while let Some(chunk) = body.next().await {
            let bytes = chunk.map_err(|e| ProviderError::network(W::PROVIDER, &e))?;
            for frame in decoder.feed(&bytes) {
                if self.apply_frame(frame, &mut outcome, on_chunk)? {
                    finished = true;
                    break;
                }
            }
            if finished {
                break;
            }
        }

        if !finished {
            for frame in decoder.finish() {
                if self.apply_frame(frame, &mut outcome, on_chunk)? {
                    break;
                }
            }
        }

        Ok(outcome)
    }

    async fn health_check(&self) -> ProviderHealth {
        let started = Instant::now();
        let result = self
            .authed(self.http.get(self.url(self.wire.models_path())))
            .timeout(self.health_timeout)
            .send()
            .await;
        let latency = started.elapsed();

        match result {
            Ok(response) => {
                let rate_limit = self.rate_limit_from(response.headers());
                let status = response.status();
                if status.is_success() {
                    ProviderHealth::reachable(W::PROVIDER, latency, rate_limit)
                } else {
                    ProviderHealth::unhealthy(W::PROVIDER, format!("HTTP {}", status.as_u16()))
                        .with_latency(latency)
                        .with_rate_limit(rate_limit)
                }
            }
            Err(err) => {
                let message = if err.is_timeout() {
                    format!(
                        "health check timed out after {}s",
                        self.health_timeout.as_secs_f32()
                    )
                } else {
                    err.to_string()
                };
                tracing::warn!(provider = %W::PROVIDER, error = %message, "Health check failed");
                ProviderHealth::unhealthy(W::PROVIDER, message).with_latency(latency)
            }
        }
    }
}
