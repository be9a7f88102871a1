//! Retrying, circuit-breaking provider wrapper.
//!
//! Every attempt runs under its own timeout. Transient failures are
//! retried with exponential backoff; fatal ones return immediately. The
//! breaker sees one outcome per call, not one per attempt, so a call that
//! exhausts its retries moves the failure count by exactly one.

use async_trait::async_trait;
use clawloop_core::error::ProviderError;
use clawloop_core::provider::{Provider, ProviderRequest, ProviderResponse};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::retry::RetryPolicy;

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ResilientProvider {
    inner: Arc<dyn Provider>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl ResilientProvider {
    /// Wrap `inner`. The breaker is injected so every holder of this
    /// provider shares one view of its health.
    pub fn new(inner: Arc<dyn Provider>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            inner,
            breaker,
            policy: RetryPolicy::default(),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    async fn attempt(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match tokio::time::timeout(self.timeout, self.inner.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "provider '{}' did not answer within {}s",
                self.inner.name(),
                self.timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl Provider for ResilientProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let permit = self.breaker.acquire().map_err(|open| {
            debug!(provider = %self.inner.name(), "Circuit open, failing fast");
            ProviderError::CircuitOpen {
                retry_after_secs: open.retry_after.as_secs(),
            }
        })?;

        let mut attempt = 1;
        loop {
            match self.attempt(request.clone()).await {
                Ok(response) => {
                    permit.success();
                    return Ok(response);
                }
                Err(e) if !e.is_transient() => {
                    error!(provider = %self.inner.name(), error = %e, "Provider call failed (fatal)");
                    permit.fatal();
                    return Err(e);
                }
                Err(e) if !self.policy.should_retry(attempt) => {
                    error!(
                        provider = %self.inner.name(),
                        attempts = attempt,
                        error = %e,
                        "Provider call failed after retries"
                    );
                    permit.failure();
                    return Err(e);
                }
                Err(e) => {
                    let mut delay = self.policy.backoff(attempt);
                    if let ProviderError::RateLimited { retry_after_secs } = e {
                        delay = delay
                            .max(Duration::from_secs(retry_after_secs))
                            .min(self.policy.max_delay);
                    }
                    warn!(
                        provider = %self.inner.name(),
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        self.inner.list_models().await
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        self.inner.health_check().await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use clawloop_core::message::Message;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted outcomes, then keeps succeeding.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<(), ProviderError>>>,
        call_count: Mutex<usize>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<(), ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
            next.map(|()| ProviderResponse {
                message: Message::assistant("ok"),
                usage: None,
                model: "test-model".into(),
                finish_reason: Default::default(),
                metadata: serde_json::Map::new(),
            })
        }
    }

    /// A provider that never answers.
    struct HangingProvider {
        call_count: Mutex<usize>,
    }

    #[async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ProviderError::Network("unreachable".into()))
        }
    }

    fn server_error() -> ProviderError {
        ProviderError::ApiError {
            status_code: 503,
            message: "Service Unavailable".into(),
        }
    }

    fn request() -> ProviderRequest {
        ProviderRequest::new("test", vec![Message::user("hello")])
    }

    fn wrap(inner: Arc<dyn Provider>, threshold: u32) -> ResilientProvider {
        ResilientProvider::new(
            inner,
            Arc::new(CircuitBreaker::new(threshold, Duration::from_secs(30))),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let inner = Arc::new(ScriptedProvider::new(vec![Err(server_error()), Err(server_error())]));
        let provider = wrap(inner.clone(), 5);

        let start = tokio::time::Instant::now();
        let response = provider.complete(request()).await.unwrap();
        assert_eq!(response.message.content, "ok");
        assert_eq!(inner.calls(), 3);
        // 2s then 4s of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        assert_eq!(provider.breaker().consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_is_not_retried() {
        let inner = Arc::new(ScriptedProvider::new(vec![Err(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let provider = wrap(inner.clone(), 5);

        let err = provider.complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert_eq!(inner.calls(), 1);
        assert_eq!(provider.breaker().consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_timeouts_count_once() {
        let inner = Arc::new(HangingProvider {
            call_count: Mutex::new(0),
        });
        let provider = wrap(inner.clone(), 5);

        let err = provider.complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
        assert_eq!(*inner.call_count.lock().unwrap(), 3);
        assert_eq!(provider.breaker().consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_fails_fast_without_calling_provider() {
        let inner = Arc::new(ScriptedProvider::new(vec![Err(server_error()); 5]));
        let provider = wrap(inner.clone(), 5).with_policy(RetryPolicy::none());

        for _ in 0..5 {
            assert!(provider.complete(request()).await.is_err());
        }
        assert_eq!(inner.calls(), 5);
        assert_eq!(provider.breaker().state(), CircuitState::Open);

        let err = provider.complete(request()).await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(inner.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn trial_after_cooldown_closes_breaker() {
        let inner = Arc::new(ScriptedProvider::new(vec![Err(server_error()); 2]));
        let provider = wrap(inner.clone(), 2).with_policy(RetryPolicy::none());

        provider.complete(request()).await.unwrap_err();
        provider.complete(request()).await.unwrap_err();
        assert!(provider.complete(request()).await.unwrap_err().is_circuit_open());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(provider.breaker().state(), CircuitState::HalfOpen);

        provider.complete(request()).await.unwrap();
        assert_eq!(inner.calls(), 3);
        assert_eq!(provider.breaker().state(), CircuitState::Closed);
        assert_eq!(provider.breaker().consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_is_shared_between_wrappers() {
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(30)));
        let inner = Arc::new(ScriptedProvider::new(vec![Err(server_error())]));
        let a = ResilientProvider::new(inner.clone(), breaker.clone()).with_policy(RetryPolicy::none());
        let b = ResilientProvider::new(inner.clone(), breaker).with_policy(RetryPolicy::none());

        a.complete(request()).await.unwrap_err();
        assert!(b.complete(request()).await.unwrap_err().is_circuit_open());
        assert_eq!(inner.calls(), 1);
    }
}
