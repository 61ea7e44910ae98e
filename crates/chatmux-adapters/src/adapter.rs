//! The provider-agnostic adapter contract.

use async_trait::async_trait;

use crate::error::{ErrorKind, ProviderResult};
use crate::health::ProviderHealth;
use crate::message::ModelRequest;
use crate::provider::ProviderId;
use crate::response::{ModelResponse, RateLimitInfo, StreamOutcome};

/// Receives each text delta of a streamed response, in order.
pub type ChunkSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Uniform interface over one upstream chat API.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// The provider this adapter talks to.
    fn provider(&self) -> ProviderId;

    /// Model ids the provider currently serves.
    async fn models(&self) -> ProviderResult<Vec<String>>;

    /// Send a request and wait for the whole completion.
    async fn request(&self, request: &ModelRequest) -> ProviderResult<ModelResponse>;

    /// Send a request and deliver text deltas to `on_chunk` as they arrive.
    async fn stream(
        &self,
        request: &ModelRequest,
        on_chunk: ChunkSink<'_>,
    ) -> ProviderResult<StreamOutcome>;

    /// Cheap reachability probe. Never fails; problems show up in the status.
    async fn health_check(&self) -> ProviderHealth;

    /// Whether the configured credential is accepted.
    async fn validate_api_key(&self) -> ProviderResult<bool> {
        match self.models().await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::Auth => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Current request quota, when the provider advertises one.
    async fn rate_limit(&self) -> ProviderResult<Option<RateLimitInfo>> {
        Ok(self.health_check().await.rate_limit)
    }
}
