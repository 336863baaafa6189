use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
use super::retry::RetryPolicy;
use crate::config::LocalAiConfig;
use crate::{Error, ErrorContext, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Releases a half-open probe slot if the admitted call never reports back
/// (its future was dropped mid-flight).
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl<'a> Admission<'a> {
    fn enter(breaker: &'a CircuitBreaker) -> Result<Self> {
        breaker.allow()?;
        Ok(Self {
            breaker,
            armed: true,
        })
    }

    fn finish<T>(mut self, outcome: &Result<T>) {
        self.armed = false;
        self.breaker.record(outcome);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.on_neutral();
        }
    }
}

/// Circuit breaker, per-attempt timeout and retry with backoff around an
/// arbitrary async operation.
///
/// The breaker gates the whole logical call and records its final outcome
/// once; inside it every attempt gets its own deadline and retryable failures
/// are retried with exponential backoff. Cancellation is observed before each
/// attempt, during each attempt and during each backoff sleep.
pub struct ResilienceEngine {
    provider: String,
    timeout: Duration,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ResilienceEngine {
    pub fn new(
        provider: impl Into<String>,
        timeout: Duration,
        policy: RetryPolicy,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let provider = provider.into();
        Self {
            breaker: CircuitBreaker::new(breaker, provider.clone()),
            provider,
            timeout,
            policy,
        }
    }

    pub fn from_config(config: &LocalAiConfig, provider: impl Into<String>) -> Self {
        Self::new(
            provider,
            config.timeout,
            RetryPolicy::new(config.max_retry_attempts, config.retry_delay),
            config.circuit_breaker.clone(),
        )
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn breaker_snapshot(&self) -> CircuitBreakerSnapshot {
        self.breaker.snapshot()
    }

    fn ctx(&self, source: &str) -> ErrorContext {
        ErrorContext::new()
            .with_provider(self.provider.clone())
            .with_source(source)
    }

    /// Run `op` under the full policy. `op` is invoked once per attempt.
    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(self.ctx("resilience")));
        }
        let admission = Admission::enter(&self.breaker)?;
        let outcome = self.retry_loop(cancel, &mut op).await;
        admission.finish(&outcome);
        outcome
    }

    /// Single gated attempt whose outcome is not recorded in the breaker.
    pub async fn probe<T, Fut>(&self, cancel: &CancellationToken, op: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(self.ctx("resilience")));
        }
        let _admission = Admission::enter(&self.breaker)?;
        self.attempt(cancel, op).await
    }

    async fn attempt<T, Fut>(&self, cancel: &CancellationToken, op: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::cancelled(self.ctx("resilience"))),
            res = tokio::time::timeout(self.timeout, op) => match res {
                Ok(inner) => inner.map_err(|e| e.with_provider(&self.provider)),
                Err(_) => Err(Error::timeout(self.timeout, self.ctx("timeout"))),
            },
        }
    }

    async fn retry_loop<T, F, Fut>(&self, cancel: &CancellationToken, op: &mut F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::cancelled(self.ctx("resilience")));
            }
            attempt += 1;
            let err = match self.attempt(cancel, op()).await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            if !err.is_retryable() || !self.policy.allows_retry_after(attempt) {
                if err.is_retryable() {
                    tracing::debug!(
                        provider = %self.provider,
                        attempts = attempt,
                        error = %err,
                        "retries exhausted"
                    );
                }
                return Err(err);
            }

            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                attempt = attempt,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                provider = %self.provider,
                error = %err,
                "retrying after transient failure"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::cancelled(self.ctx("resilience"))),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn engine(max_retries: u32) -> ResilienceEngine {
        ResilienceEngine::new(
            "KoboldCpp",
            Duration::from_secs(5),
            RetryPolicy::new(max_retries, Duration::from_millis(100)),
            CircuitBreakerConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let e = engine(3);
        let calls = &AtomicU32::new(0);
        let out = e
            .execute(&CancellationToken::new(), move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::transport("refused", ErrorContext::new()))
                } else {
                    Ok("done")
                }
            })
            .await
            .unwrap();
        assert_eq!(out, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(e.breaker_snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_get_provider_attached() {
        let e = engine(0);
        let err = e
            .execute(&CancellationToken::new(), || async {
                Err::<(), _>(Error::protocol("bad", ErrorContext::new().with_status_code(404)))
            })
            .await
            .unwrap_err();
        assert_eq!(err.provider(), Some("KoboldCpp"));
        assert_eq!(err.status_code(), Some(404));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retryable() {
        let e = ResilienceEngine::new(
            "Ollama",
            Duration::from_millis(50),
            RetryPolicy::new(1, Duration::from_millis(10)),
            CircuitBreakerConfig::default(),
        );
        let calls = &AtomicU32::new(0);
        let err = e
            .execute(&CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_does_not_touch_breaker() {
        let e = engine(3);
        let err = e
            .probe(&CancellationToken::new(), async {
                Err::<(), _>(Error::transport("refused", ErrorContext::new()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(e.breaker_snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_cancelled_never_invokes() {
        let e = engine(3);
        let token = CancellationToken::new();
        token.cancel();
        let calls = &AtomicU32::new(0);
        let err = e
            .execute(&token, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
