//! LM Studio adapter. LM Studio serves the OpenAI API; chat completions are
//! the default, plain completions are available for raw prompting.

use super::openai_compat::{self, Endpoint, SamplingDefaults};
use super::Provider;
use crate::config::LmStudioOptions;
use crate::transport::HttpTransport;
use crate::types::{CompletionRequest, ModelCapabilities, ModelDescriptor};
use crate::{BoxStream, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const NAME: &str = "LMStudio";
const DEFAULT_MODEL: &str = "default";

pub struct LmStudioProvider {
    options: LmStudioOptions,
    transport: Arc<HttpTransport>,
}

impl LmStudioProvider {
    pub fn new(options: LmStudioOptions, transport: Arc<HttpTransport>) -> Self {
        Self { options, transport }
    }

    fn endpoint(&self) -> Endpoint {
        if self.options.use_openai_endpoint {
            Endpoint::ChatCompletions
        } else {
            Endpoint::Completions
        }
    }

    // Only caller-supplied sampling values are sent; LM Studio applies the
    // per-model presets configured in its UI for the rest.
    fn build_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let model = request.options.model.as_deref().unwrap_or(DEFAULT_MODEL);
        openai_compat::build_body(
            self.endpoint(),
            Some(model),
            request,
            &SamplingDefaults::default(),
            stream,
        )
    }
}

#[async_trait]
impl Provider for LmStudioProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let body = self.build_body(request, false);
        openai_compat::complete(&self.transport, self.endpoint(), &body, cancel).await
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, String>> {
        let body = self.build_body(request, true);
        openai_compat::stream(&self.transport, self.endpoint(), &body, cancel).await
    }

    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<ModelDescriptor>> {
        let caps = ModelCapabilities {
            supports_streaming: true,
            supports_stop_sequences: false,
            ..ModelCapabilities::default()
        };
        openai_compat::list_models(&self.transport, NAME, caps, cancel).await
    }

    async fn health_check(&self, cancel: &CancellationToken) -> bool {
        match self.transport.get_json("v1/models", cancel).await {
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
