//! Ollama adapter over the native `api/generate` endpoint (NDJSON streaming).

use super::{num, set_opt, stop_value, Provider};
use crate::config::OllamaOptions;
use crate::pipeline::{map_frames, Decoder, Frame, NdjsonDecoder};
use crate::transport::HttpTransport;
use crate::types::{CompletionRequest, ModelCapabilities, ModelDescriptor};
use crate::{BoxStream, Error, ErrorContext, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

const NAME: &str = "Ollama";
const DEFAULT_MODEL: &str = "default";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_TOP_P: f32 = 0.9;

/// Ollama adapter. `concurrent_requests` caps in-flight generations; a
/// streaming generation holds its slot until the stream is dropped.
pub struct OllamaProvider {
    transport: Arc<HttpTransport>,
    permits: Arc<Semaphore>,
    version: RwLock<Option<String>>,
}

impl OllamaProvider {
    pub fn new(options: OllamaOptions, transport: Arc<HttpTransport>) -> Self {
        Self {
            transport,
            permits: Arc::new(Semaphore::new(options.concurrent_requests.max(1))),
            version: RwLock::new(None),
        }
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let opts = &request.options;
        let mut options = Map::new();
        options.insert(
            "temperature".into(),
            num(opts.temperature.unwrap_or(DEFAULT_TEMPERATURE)),
        );
        options.insert("top_p".into(), num(opts.top_p.unwrap_or(DEFAULT_TOP_P)));
        options.insert(
            "num_predict".into(),
            opts.max_tokens.map_or(Value::from(-1), Value::from),
        );
        set_opt(&mut options, "stop", stop_value(request));

        let mut body = Map::new();
        body.insert(
            "model".into(),
            Value::String(opts.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string())),
        );
        body.insert("prompt".into(), Value::String(request.prompt.clone()));
        body.insert("stream".into(), stream.into());
        body.insert("options".into(), Value::Object(options));

        let mut body = Value::Object(body);
        request.merge_provider_parameters(&mut body);
        body
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit> {
        let ctx = || {
            ErrorContext::new()
                .with_provider(NAME)
                .with_source("ollama")
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::cancelled(ctx())),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| Error::transport("request slots closed", ctx()))
            }
        }
    }
}

fn stream_frame(v: &Value) -> Frame {
    let text = v["response"].as_str().unwrap_or_default();
    if v["done"] == true && text.is_empty() {
        return Frame::Done;
    }
    Frame::Text(text.to_string())
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> Option<String> {
        self.version.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let _permit = self.acquire(cancel).await?;
        let body = self.build_body(request, false);
        let v = self.transport.post_json("api/generate", &body, cancel).await?;
        Ok(v["response"].as_str().unwrap_or_default().to_string())
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, String>> {
        let permit = self.acquire(cancel).await?;
        let body = self.build_body(request, true);
        let bytes = self
            .transport
            .post_stream("api/generate", &body, cancel)
            .await?;
        let frames = NdjsonDecoder.decode_stream(bytes);
        Ok(map_frames(frames, move |v| {
            let _held = &permit;
            stream_frame(v)
        }))
    }

    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<ModelDescriptor>> {
        let v = self.transport.get_json("api/tags", cancel).await?;
        let caps = ModelCapabilities {
            supports_streaming: true,
            ..ModelCapabilities::default()
        };
        let models = v["models"].as_array().cloned().unwrap_or_default();
        Ok(models
            .iter()
            .filter_map(|m| {
                let name = m["name"].as_str()?;
                let mut model = ModelDescriptor::named(name, NAME).with_capabilities(caps.clone());
                for key in ["size", "digest", "modified_at"] {
                    if !m[key].is_null() {
                        model = model.with_metadata(key, m[key].clone());
                    }
                }
                Some(model)
            })
            .collect())
    }

    async fn health_check(&self, cancel: &CancellationToken) -> bool {
        match self.transport.get_json("api/version", cancel).await {
            Ok(v) => {
                if let Some(found) = v["version"].as_str() {
                    *self.version.write().unwrap_or_else(|p| p.into_inner()) =
                        Some(found.to_string());
                }
                true
            }
            Err(e) => {
                tracing::debug!(provider = NAME, error = %e, "health check failed");
                false
            }
        }
    }

    fn dispose(&self) {
        self.permits.close();
        self.transport.dispose();
    }
}
