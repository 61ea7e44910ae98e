//! Scripted in-memory adapter for orchestrator and health tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chatmux_adapters::{
    ChunkSink, ErrorKind, HealthStatus, ModelAdapter, ModelRequest, ModelResponse, ProviderError,
    ProviderHealth, ProviderId, ProviderResult, ResponseMetadata, StreamOutcome, TokenUsage,
};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Reply(&'static str),
    Stream(Vec<&'static str>),
    Fail(ErrorKind),
    /// Emit the chunks, then never finish.
    Hang(Vec<&'static str>),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Probe {
    Status(HealthStatus),
    Slow(Duration),
    Panic,
}

#[derive(Debug)]
pub(crate) struct ScriptedAdapter {
    provider: ProviderId,
    steps: Mutex<VecDeque<Step>>,
    probe: Mutex<Probe>,
    pub calls: AtomicU32,
    pub probes: AtomicU32,
    pub requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedAdapter {
    pub fn new(provider: ProviderId, steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            provider,
            steps: Mutex::new(steps.into_iter().collect()),
            probe: Mutex::new(Probe::Status(HealthStatus::Healthy)),
            calls: AtomicU32::new(0),
            probes: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_probe(self, probe: Probe) -> Self {
        *self.probe.lock() = probe;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self, request: &ModelRequest) -> Step {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        self.steps.lock().pop_front().unwrap_or(Step::Reply("ok"))
    }
}

pub(crate) fn error(provider: ProviderId, kind: ErrorKind) -> ProviderError {
    match kind {
        ErrorKind::Auth => ProviderError::auth(provider, "invalid key"),
        ErrorKind::RateLimit => {
            ProviderError::rate_limited(provider, "slow down", Duration::from_secs(1), chrono::Utc::now())
        }
        ErrorKind::Server => ProviderError::Server {
            provider,
            status: 503,
            message: "overloaded".into(),
        },
        ErrorKind::Network => ProviderError::Network {
            provider,
            message: "connection reset".into(),
        },
        ErrorKind::Validation => ProviderError::validation(provider, "bad request"),
        ErrorKind::Unknown => ProviderError::Unknown {
            provider,
            status: 418,
            message: "teapot".into(),
        },
    }
}

#[async_trait]
impl ModelAdapter for ScriptedAdapter {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    async fn models(&self) -> ProviderResult<Vec<String>> {
        Ok(vec![])
    }

    async fn request(&self, request: &ModelRequest) -> ProviderResult<ModelResponse> {
        let text = match self.next(request) {
            Step::Reply(text) => text.to_string(),
            Step::Stream(chunks) => chunks.concat(),
            Step::Fail(kind) => return Err(error(self.provider, kind)),
            Step::Hang(_) => std::future::pending().await,
        };
        Ok(ModelResponse {
            text,
            tokens: Some(TokenUsage::new(3, 2)),
            metadata: ResponseMetadata::new(self.provider, request.model.clone()),
        })
    }

    async fn stream(
        &self,
        request: &ModelRequest,
        on_chunk: ChunkSink<'_>,
    ) -> ProviderResult<StreamOutcome> {
        match self.next(request) {
            Step::Reply(text) => on_chunk(text),
            Step::Stream(chunks) => chunks.into_iter().for_each(|c| on_chunk(c)),
            Step::Fail(kind) => return Err(error(self.provider, kind)),
            Step::Hang(chunks) => {
                chunks.into_iter().for_each(|c| on_chunk(c));
                std::future::pending::<()>().await;
            }
        }
        let mut outcome = StreamOutcome::new(self.provider, request.model.clone());
        outcome.tokens = Some(TokenUsage::new(3, 2));
        Ok(outcome)
    }

    async fn health_check(&self) -> ProviderHealth {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let probe = *self.probe.lock();
        match probe {
            Probe::Status(HealthStatus::Healthy) => {
                ProviderHealth::reachable(self.provider, Duration::from_millis(20), None)
            }
            Probe::Status(HealthStatus::Degraded) => {
                ProviderHealth::reachable(self.provider, Duration::from_secs(4), None)
            }
            Probe::Status(HealthStatus::Unknown) => ProviderHealth::unknown(self.provider, "scripted"),
            Probe::Status(HealthStatus::Unhealthy) => ProviderHealth::unhealthy(self.provider, "HTTP 503"),
            Probe::Slow(delay) => {
                tokio::time::sleep(delay).await;
                ProviderHealth::reachable(self.provider, delay, None)
            }
            Probe::Panic => panic!("probe exploded"),
        }
    }
}
