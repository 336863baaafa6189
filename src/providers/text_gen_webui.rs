//! oobabooga Text Generation WebUI adapter, over either its OpenAI-compatible
//! completions endpoint or the legacy `api/v1` blocking/streaming API.

use super::openai_compat::{self, Endpoint, SamplingDefaults};
use super::Provider;
use crate::config::TextGenWebUiOptions;
use crate::pipeline::{map_frames, Decoder, Frame, SseDecoder};
use crate::transport::HttpTransport;
use crate::types::{CompletionRequest, ModelCapabilities, ModelDescriptor};
use crate::{BoxStream, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const NAME: &str = "TextGenerationWebUI";

pub struct TextGenWebUiProvider {
    options: TextGenWebUiOptions,
    transport: Arc<HttpTransport>,
}

fn capabilities() -> ModelCapabilities {
    ModelCapabilities {
        supports_streaming: true,
        ..ModelCapabilities::default()
    }
}

/// Legacy stream events: `{"token": {"text": ..}}` or `{"token": ".."}`.
fn native_frame(v: &Value) -> Frame {
    if v["event"] == "stream_end" {
        return Frame::Done;
    }
    match &v["token"] {
        Value::String(t) => Frame::Text(t.clone()),
        other => match other["text"].as_str() {
            Some(t) => Frame::Text(t.to_string()),
            None => Frame::Skip,
        },
    }
}

impl TextGenWebUiProvider {
    pub fn new(options: TextGenWebUiOptions, transport: Arc<HttpTransport>) -> Self {
        Self { options, transport }
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        // The model loaded in the UI is used unless the caller names one.
        openai_compat::build_body(
            Endpoint::Completions,
            request.options.model.as_deref(),
            request,
            &SamplingDefaults::default(),
            stream,
        )
    }

    fn models_path(&self) -> &'static str {
        if self.options.use_openai_endpoint {
            "v1/models"
        } else {
            "api/v1/model"
        }
    }
}

#[async_trait]
impl Provider for TextGenWebUiProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let body = self.build_body(request, false);
        if self.options.use_openai_endpoint {
            return openai_compat::complete(&self.transport, Endpoint::Completions, &body, cancel)
                .await;
        }
        let v = self
            .transport
            .post_json("api/v1/generate", &body, cancel)
            .await?;
        Ok(v["results"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, String>> {
        let body = self.build_body(request, true);
        if self.options.use_openai_endpoint {
            return openai_compat::stream(&self.transport, Endpoint::Completions, &body, cancel)
                .await;
        }
        let bytes = self
            .transport
            .post_stream("api/v1/stream", &body, cancel)
            .await?;
        let frames = SseDecoder::default().decode_stream(bytes);
        Ok(map_frames(frames, native_frame))
    }

    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<ModelDescriptor>> {
        if self.options.use_openai_endpoint {
            return openai_compat::list_models(&self.transport, NAME, capabilities(), cancel).await;
        }
        let v = self.transport.get_json(self.models_path(), cancel).await?;
        Ok(match v["result"].as_str() {
            Some(name) if !name.is_empty() => {
                vec![ModelDescriptor::named(name, NAME).with_capabilities(capabilities())]
            }
            _ => Vec::new(),
        })
    }

    async fn health_check(&self, cancel: &CancellationToken) -> bool {
        match self.transport.get_json(self.models_path(), cancel).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(provider = NAME, error = %e, "health check failed");
                false
            }
        }
    }

    fn dispose(&self) {
        self.transport.dispose();
    }
}
