//! Shared fixtures: an in-process provider driven by a script of outcomes.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use localai_client::{
    BoxStream, CompletionRequest, Error, ErrorContext, InMemoryProgressSink, LocalAiClient,
    LocalAiClientBuilder, LocalAiConfig, ModelDescriptor, Provider, Result,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const NAME: &str = "Scripted";

/// What one provider invocation does.
pub enum Step {
    Text(&'static str),
    Fragments(Vec<Result<String>>),
    Fail(Error),
    /// Sleep before answering, to trip the per-attempt timeout.
    Stall(Duration),
}

pub fn transport_error() -> Error {
    Error::transport("connection refused", ErrorContext::new())
}

pub fn status_error(status: u16) -> Error {
    Error::protocol(
        format!("API request failed with status {}", status),
        ErrorContext::new().with_status_code(status),
    )
}

/// Provider that replays `steps` in order; once exhausted it repeats `fallback`.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    fallback: fn() -> Step,
    calls: AtomicU32,
    call_times: Mutex<Vec<Instant>>,
    models: Vec<ModelDescriptor>,
    model_steps: Mutex<VecDeque<Step>>,
    healthy: bool,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback: || Step::Fail(transport_error()),
            calls: AtomicU32::new(0),
            call_times: Mutex::new(Vec::new()),
            models: Vec::new(),
            model_steps: Mutex::new(VecDeque::new()),
            healthy: true,
        }
    }

    pub fn always(fallback: fn() -> Step) -> Self {
        let mut p = Self::new(Vec::new());
        p.fallback = fallback;
        p
    }

    pub fn with_models(mut self, models: Vec<ModelDescriptor>) -> Self {
        self.models = models;
        self
    }

    /// Outcomes for `list_models`; once exhausted it returns the configured models.
    pub fn with_model_steps(self, steps: Vec<Step>) -> Self {
        *self.model_steps.lock().unwrap() = steps.into();
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    fn next_step(&self) -> Step {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        let scripted = self.steps.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| (self.fallback)())
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn complete(
        &self,
        _request: &CompletionRequest,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        match self.next_step() {
            Step::Text(t) => Ok(t.to_string()),
            Step::Fragments(f) => Ok(f.into_iter().filter_map(|r| r.ok()).collect()),
            Step::Fail(e) => Err(e),
            Step::Stall(d) => {
                tokio::time::sleep(d).await;
                Ok("late".to_string())
            }
        }
    }

    async fn stream(
        &self,
        _request: &CompletionRequest,
        _cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, String>> {
        match self.next_step() {
            Step::Text(t) => Ok(Box::pin(stream::iter(vec![Ok(t.to_string())]))),
            Step::Fragments(f) => Ok(Box::pin(stream::iter(f))),
            Step::Fail(e) => Err(e),
            Step::Stall(d) => {
                tokio::time::sleep(d).await;
                Ok(Box::pin(stream::empty()))
            }
        }
    }

    async fn list_models(&self, _cancel: &CancellationToken) -> Result<Vec<ModelDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.model_steps.lock().unwrap().pop_front();
        match scripted {
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Stall(d)) => {
                tokio::time::sleep(d).await;
                Ok(self.models.clone())
            }
            _ => Ok(self.models.clone()),
        }
    }

    async fn health_check(&self, _cancel: &CancellationToken) -> bool {
        self.healthy
    }
}

/// Config with a short backoff base and the given retry budget.
pub fn config(max_retries: u32) -> LocalAiConfig {
    LocalAiConfig::default()
        .with_max_retry_attempts(max_retries)
        .with_retry_delay(Duration::from_millis(100))
        .with_timeout(Duration::from_secs(5))
}

pub fn client(
    config: LocalAiConfig,
    provider: Arc<ScriptedProvider>,
) -> (LocalAiClient, Arc<InMemoryProgressSink>) {
    let sink = Arc::new(InMemoryProgressSink::new());
    let client = LocalAiClientBuilder::from_config(config)
        .with_provider(provider)
        .progress_sink(sink.clone())
        .build()
        .unwrap();
    (client, sink)
}
