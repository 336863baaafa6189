use crate::config::LocalAiConfig;
use crate::pipeline::{FragmentStream, OpenFuture};
use crate::progress::{OperationProgress, ProgressHub, ProgressSink, SubscriptionId};
use crate::providers::Provider;
use crate::resilience::{CircuitBreakerSnapshot, ResilienceEngine};
use crate::transport::{with_request_id, HttpTransport};
use crate::types::{CompletionOptions, CompletionRequest, ModelDescriptor};
use crate::{Error, ErrorContext, Result};
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Client for one local text-generation server.
///
/// Every network operation runs through the same resilience engine: the
/// circuit breaker gates the call, retries back off exponentially, and each
/// attempt is bounded by the configured timeout. `complete` and `stream`
/// report their lifecycle to the registered progress sinks.
pub struct LocalAiClient {
    pub(crate) config: LocalAiConfig,
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) transport: Arc<HttpTransport>,
    pub(crate) engine: Arc<ResilienceEngine>,
    pub(crate) hub: Arc<ProgressHub>,
    pub(crate) disposed: AtomicBool,
}

impl LocalAiClient {
    /// Validate `config`, select the adapter and build the client.
    ///
    /// Fails with a configuration error before any network access.
    pub fn new(config: LocalAiConfig) -> Result<Self> {
        crate::client::builder::LocalAiClientBuilder::from_config(config).build()
    }

    pub fn builder() -> crate::client::builder::LocalAiClientBuilder {
        crate::client::builder::LocalAiClientBuilder::new()
    }

    pub fn config(&self) -> &LocalAiConfig {
        &self.config
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Server version, known after a successful health check.
    pub fn version(&self) -> Option<String> {
        self.provider.version()
    }

    pub fn supports_streaming(&self) -> bool {
        self.provider.supports_streaming()
    }

    pub fn breaker_snapshot(&self) -> CircuitBreakerSnapshot {
        self.engine.breaker_snapshot()
    }

    pub fn subscribe(&self, sink: Arc<dyn ProgressSink>) -> SubscriptionId {
        self.hub.subscribe(sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Release the adapter and the HTTP client. Safe to call more than once.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.provider.dispose();
        self.transport.dispose();
        info!(provider = self.provider.name(), "client disposed");
    }

    fn ensure_open(&self, source: &str) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::transport(
                "client disposed",
                ErrorContext::new()
                    .with_provider(self.provider.name())
                    .with_source(source),
            ));
        }
        Ok(())
    }

    /// Generate text for `prompt` in one call.
    pub async fn complete(
        &self,
        prompt: impl Into<String>,
        options: Option<CompletionOptions>,
    ) -> Result<String> {
        self.complete_with_cancel(prompt, options, &CancellationToken::new())
            .await
    }

    /// Like [`complete`](Self::complete), abandoning the call when `cancel` fires.
    ///
    /// Observers see `Starting`, then either `Processing` and `Complete`, or
    /// a single `Failed` carrying the error message.
    pub async fn complete_with_cancel(
        &self,
        prompt: impl Into<String>,
        options: Option<CompletionOptions>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let request = CompletionRequest::new(prompt, options);
        let operation_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "complete",
            operation_id = %operation_id,
            provider = self.provider.name()
        );

        let progress =
            OperationProgress::new(Arc::clone(&self.hub), self.engine.policy().max_attempts());
        progress.start("Starting completion...");

        let attempts = progress.attempt_counter();
        let outcome = match self.ensure_open("complete") {
            Err(e) => Err(e),
            Ok(()) => {
                let call = self.engine.execute(cancel, || {
                    attempts.fetch_add(1, Ordering::AcqRel);
                    self.provider.complete(&request, cancel)
                });
                with_request_id(operation_id.clone(), call.instrument(span)).await
            }
        };

        match outcome {
            Ok(text) => {
                progress.processing("Processing response...");
                progress.complete("Completion finished");
                info!(
                    operation_id = %operation_id,
                    attempts = attempts.load(Ordering::Acquire),
                    chars = text.len(),
                    "completion finished"
                );
                Ok(text)
            }
            Err(e) => {
                progress.fail(format!("Completion failed: {}", e));
                warn!(operation_id = %operation_id, error = %e, kind = ?e.kind(), "completion failed");
                Err(e)
            }
        }
    }

    /// Start a streaming completion.
    ///
    /// Nothing is sent until the returned stream is first polled. Opening the
    /// stream goes through the resilience engine; once fragments flow, a
    /// failure ends the stream without a retry.
    pub fn stream(
        &self,
        prompt: impl Into<String>,
        options: Option<CompletionOptions>,
    ) -> FragmentStream {
        self.stream_with_cancel(prompt, options, CancellationToken::new())
    }

    pub fn stream_with_cancel(
        &self,
        prompt: impl Into<String>,
        options: Option<CompletionOptions>,
        cancel: CancellationToken,
    ) -> FragmentStream {
        let request = CompletionRequest::new(prompt, options);
        let operation_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "stream",
            operation_id = %operation_id,
            provider = self.provider.name()
        );

        let progress = Arc::new(OperationProgress::new(
            Arc::clone(&self.hub),
            self.engine.policy().max_attempts(),
        ));
        let attempts = progress.attempt_counter();
        let opened = self.ensure_open("stream");
        let engine = Arc::clone(&self.engine);
        let provider = Arc::clone(&self.provider);
        let token = cancel.clone();

        let open: OpenFuture = async move {
            opened?;
            let call = engine.execute(&token, || {
                attempts.fetch_add(1, Ordering::AcqRel);
                provider.stream(&request, &token)
            });
            with_request_id(operation_id, call).await
        }
        .instrument(span)
        .boxed();

        FragmentStream::new(self.provider.name(), open, progress, cancel)
    }

    /// Models the server reports. An empty list is a valid answer.
    pub async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        self.list_models_with_cancel(&CancellationToken::new())
            .await
    }

    pub async fn list_models_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ModelDescriptor>> {
        self.ensure_open("list_models")?;
        let operation_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "list_models",
            operation_id = %operation_id,
            provider = self.provider.name()
        );
        let call = self
            .engine
            .execute(cancel, || self.provider.list_models(cancel));
        with_request_id(operation_id, call.instrument(span)).await
    }

    /// `true` when the server answers. Never fails; an open breaker or a
    /// timed out probe reads as unhealthy.
    pub async fn health_check(&self) -> bool {
        self.health_check_with_cancel(&CancellationToken::new())
            .await
    }

    pub async fn health_check_with_cancel(&self, cancel: &CancellationToken) -> bool {
        if self.is_disposed() {
            return false;
        }
        let operation_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "health_check",
            operation_id = %operation_id,
            provider = self.provider.name()
        );
        let probe = self.engine.probe(cancel, async {
            Ok::<_, Error>(self.provider.health_check(cancel).await)
        });
        match with_request_id(operation_id, probe.instrument(span)).await {
            Ok(healthy) => healthy,
            Err(e) => {
                tracing::debug!(provider = self.provider.name(), error = %e, "health check failed");
                false
            }
        }
    }
}

impl Drop for LocalAiClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::builder::LocalAiClientBuilder;
    use crate::config::OllamaOptions;
    use crate::config::ProviderOptions;
    use crate::progress::InMemoryProgressSink;
    use crate::types::ProgressState;
    use crate::ErrorKind;
    use futures::StreamExt;

    fn client() -> LocalAiClient {
        LocalAiClientBuilder::new()
            .base_url("http://127.0.0.1:9")
            .provider_options(ProviderOptions::Ollama(OllamaOptions::default()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_disposed_client_fails_fast() {
        let client = client();
        let sink = Arc::new(InMemoryProgressSink::new());
        client.subscribe(sink.clone());
        client.dispose();
        client.dispose();
        assert!(client.is_disposed());

        let err = client.complete("hi", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(
            sink.states(),
            vec![ProgressState::Starting, ProgressState::Failed]
        );

        assert!(client.list_models().await.is_err());
        assert!(!client.health_check().await);

        let mut s = client.stream("hi", None);
        assert!(s.next().await.unwrap().is_err());
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn test_pre_cancelled_complete() {
        let client = client();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .complete_with_cancel("hi", None, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
