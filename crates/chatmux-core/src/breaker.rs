//! Per-provider circuit breaker.
//!
//! ```text
//!   Closed ──(threshold failures within the monitoring period)──▶ Open
//!   Open ──(recovery timeout elapsed, next call)──▶ HalfOpen
//!   HalfOpen ──(trial succeeds)──▶ Closed
//!   HalfOpen ──(trial fails)──▶ Open
//! ```
//!
//! While half-open exactly one trial call is in flight; everyone else is
//! rejected as if the circuit were still open.

use std::future::Future;
use std::time::Duration;

use chatmux_adapters::ProviderId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The call was rejected without running the operation.
    #[error("circuit breaker is open for {provider}")]
    Open {
        provider: ProviderId,
        /// Time until a trial call will be admitted.
        retry_in: Duration,
    },

    /// The operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub provider: ProviderId,
    pub state: CircuitState,
    pub failures: u32,
    /// Remaining cool-down while open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in: Option<Duration>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure_time: Option<Instant>,
    next_attempt_time: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure_time: None,
            next_attempt_time: None,
            trial_in_flight: false,
        }
    }
}

/// How a call was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    provider: ProviderId,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(provider: ProviderId, config: CircuitBreakerConfig) -> Self {
        Self {
            provider,
            config,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    /// Run `op` unless the circuit is open. Never retries.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        };

        let result = op().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.on_success(admission),
            Err(_) => self.on_failure(),
        }
        result.map_err(BreakerError::Inner)
    }

    fn admit<E>(&self) -> Result<Admission, BreakerError<E>> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let next = inner.next_attempt_time.unwrap_or(now);
                if now < next {
                    return Err(BreakerError::Open {
                        provider: self.provider,
                        retry_in: next - now,
                    });
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                tracing::info!(provider = %self.provider, "Circuit breaker half-open, admitting trial call");
                Ok(Admission::Trial)
            }
            CircuitState::HalfOpen if inner.trial_in_flight => Err(BreakerError::Open {
                provider: self.provider,
                retry_in: Duration::ZERO,
            }),
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                Ok(Admission::Trial)
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        match (inner.state, admission) {
            // Only the trial call may close a tripped circuit.
            (CircuitState::Open, _) | (CircuitState::HalfOpen, Admission::Normal) => {}
            (CircuitState::HalfOpen, Admission::Trial) => {
                tracing::info!(provider = %self.provider, "Circuit breaker closed after successful trial");
                *inner = BreakerState::closed();
            }
            (CircuitState::Closed, _) => *inner = BreakerState::closed(),
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::HalfOpen => {
                inner.failures += 1;
                inner.last_failure_time = Some(now);
                self.trip(&mut inner, now);
                tracing::warn!(provider = %self.provider, "Circuit breaker re-opened after failed trial");
            }
            CircuitState::Closed => {
                let stale = inner
                    .last_failure_time
                    .is_some_and(|last| now.duration_since(last) > self.config.monitoring_period());
                inner.failures = if stale { 1 } else { inner.failures + 1 };
                inner.last_failure_time = Some(now);

                if inner.failures >= self.config.failure_threshold.max(1) {
                    self.trip(&mut inner, now);
                    tracing::warn!(
                        provider = %self.provider,
                        failures = inner.failures,
                        recovery_ms = self.config.recovery_timeout_ms,
                        "Circuit breaker opened"
                    );
                }
            }
            // A call admitted before the circuit opened finished late.
            CircuitState::Open => {
                inner.last_failure_time = Some(now);
            }
        }
    }

    fn trip(&self, inner: &mut BreakerState, now: Instant) {
        inner.state = CircuitState::Open;
        inner.next_attempt_time = Some(now + self.config.recovery_timeout());
        inner.trial_in_flight = false;
    }

    /// A trial future was dropped before completing.
    fn abandon_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        let now = Instant::now();
        BreakerSnapshot {
            provider: self.provider,
            state: inner.state,
            failures: inner.failures,
            retry_in: match inner.state {
                CircuitState::Open => inner.next_attempt_time.map(|next| next.saturating_duration_since(now)),
                _ => None,
            },
        }
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerState::closed();
        tracing::info!(provider = %self.provider, "Circuit breaker reset");
    }
}

/// Frees the half-open slot if a trial is cancelled mid-flight.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout_ms: 60_000,
            monitoring_period_ms: 300_000,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.execute(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        breaker.execute(|| async { Ok(7) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold_and_short_circuits() {
        let breaker = CircuitBreaker::new(ProviderId::OpenAi, config(2));
        assert!(matches!(fail(&breaker).await, Err(BreakerError::Inner("boom"))));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(matches!(fail(&breaker).await, Err(BreakerError::Inner(_))));
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let result = breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        match result {
            Err(BreakerError::Open { provider, retry_in }) => {
                assert_eq!(provider, ProviderId::OpenAi);
                assert_eq!(retry_in, Duration::from_secs(60));
            }
            other => panic!("expected open circuit, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_success_closes() {
        let breaker = CircuitBreaker::new(ProviderId::Anthropic, config(1));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_failure_reopens() {
        let breaker = CircuitBreaker::new(ProviderId::Gemini, config(1));
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(matches!(fail(&breaker).await, Err(BreakerError::Inner(_))));
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.retry_in, Some(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let breaker = Arc::new(CircuitBreaker::new(ProviderId::Mistral, config(1)));
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(60)).await;

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let trial = tokio::spawn({
            let breaker = breaker.clone();
            async move {
                breaker
                    .execute(|| async move {
                        let _ = wait.await;
                        Ok::<_, &str>("trial")
                    })
                    .await
            }
        });
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let concurrent = succeed(&breaker).await;
        assert!(matches!(concurrent, Err(BreakerError::Open { .. })));

        release.send(()).unwrap();
        assert_eq!(trial.await.unwrap().unwrap(), "trial");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_does_not_close_open_circuit() {
        let breaker = Arc::new(CircuitBreaker::new(ProviderId::Anthropic, config(1)));

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let slow = tokio::spawn({
            let breaker = breaker.clone();
            async move {
                breaker
                    .execute(|| async move {
                        let _ = wait.await;
                        Ok::<_, &str>("late")
                    })
                    .await
            }
        });
        tokio::task::yield_now().await;

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        release.send(()).unwrap();
        assert_eq!(slow.await.unwrap().unwrap(), "late");
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failures, 1);
        assert!(matches!(succeed(&breaker).await, Err(BreakerError::Open { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_frees_the_slot() {
        let breaker = CircuitBreaker::new(ProviderId::OpenAi, config(1));
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(60)).await;

        let hung = breaker.execute(|| std::future::pending::<Result<(), &str>>());
        let timed_out = tokio::time::timeout(Duration::from_secs(1), hung).await;
        assert!(timed_out.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_monitoring_period_restart_count() {
        let breaker = CircuitBreaker::new(ProviderId::OpenAi, config(3));
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.failures(), 2);

        tokio::time::advance(Duration::from_secs(301)).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.failures(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_failure_count() {
        let breaker = CircuitBreaker::new(ProviderId::OpenAi, config(3));
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        let _ = fail(&breaker).await;
        assert_eq!(breaker.failures(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_immediately() {
        let breaker = CircuitBreaker::new(ProviderId::OpenAi, config(1));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.reset();
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
    }
}
