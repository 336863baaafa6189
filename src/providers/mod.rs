//! 后端适配器模块：统一的 Provider 能力接口、按配置选择适配器的分发器，以及各后端实现。
//!
//! # Providers
//!
//! Every supported backend family implements [`Provider`]. The concrete
//! adapter is chosen once, at client construction, by [`create_provider`],
//! which is an exhaustive match over [`ProviderOptions`]: adding a backend
//! means adding a variant and a match arm, and the compiler points at both.
//!
//! | Adapter | Backend |
//! |---------|---------|
//! | [`kobold::KoboldCppNativeProvider`] | KoboldCpp native generate API |
//! | [`kobold::KoboldCppOpenAiProvider`] | KoboldCpp OpenAI-compatible API |
//! | [`lm_studio::LmStudioProvider`] | LM Studio |
//! | [`text_gen_webui::TextGenWebUiProvider`] | oobabooga Text Generation WebUI |
//! | [`ollama::OllamaProvider`] | Ollama |

use crate::config::{LocalAiConfig, ProviderOptions};
use crate::transport::HttpTransport;
use crate::types::{CompletionRequest, ModelDescriptor};
use crate::{BoxStream, Error, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod kobold;
pub mod lm_studio;
pub mod ollama;
mod openai_compat;
pub mod text_gen_webui;

pub use kobold::{KoboldCppNativeProvider, KoboldCppOpenAiProvider};
pub use lm_studio::LmStudioProvider;
pub use ollama::OllamaProvider;
pub use text_gen_webui::TextGenWebUiProvider;

/// Capability contract shared by every backend adapter.
///
/// Adapters perform exactly one round trip per call: retries, timeouts and
/// circuit breaking are applied around them by the client. Every failure is
/// reported as [`Error`] with the provider name attached.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable backend name, used in errors and logs.
    fn name(&self) -> &str;

    /// Server version, once a health check has discovered it.
    fn version(&self) -> Option<String> {
        None
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn complete(&self, request: &CompletionRequest, cancel: &CancellationToken)
        -> Result<String>;

    /// Open a finite, single-use sequence of text fragments.
    ///
    /// Returns once the backend accepted the request; fragments are then
    /// pulled lazily from the response body.
    async fn stream(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, String>>;

    /// An empty list is a valid answer.
    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<ModelDescriptor>>;

    /// Never fails: any error means "not healthy".
    async fn health_check(&self, cancel: &CancellationToken) -> bool;

    /// Release network resources. Idempotent.
    fn dispose(&self) {}
}

/// Build the adapter selected by `config.provider`.
pub fn create_provider(
    config: &LocalAiConfig,
    transport: Arc<HttpTransport>,
) -> Result<Arc<dyn Provider>> {
    let options = config
        .provider
        .as_ref()
        .ok_or_else(|| Error::configuration("Provider options must be specified"))?;

    let provider: Arc<dyn Provider> = match options {
        ProviderOptions::KoboldCpp(o) => {
            Arc::new(KoboldCppNativeProvider::new(o.clone(), transport))
        }
        ProviderOptions::KoboldCppOpenAi(o) => {
            Arc::new(KoboldCppOpenAiProvider::new(o.clone(), transport))
        }
        ProviderOptions::LmStudio(o) => Arc::new(LmStudioProvider::new(o.clone(), transport)),
        ProviderOptions::TextGenWebUi(o) => {
            Arc::new(TextGenWebUiProvider::new(o.clone(), transport))
        }
        ProviderOptions::Ollama(o) => Arc::new(OllamaProvider::new(o.clone(), transport)),
    };
    tracing::debug!(provider = provider.name(), "provider selected");
    Ok(provider)
}

/// JSON number for an `f32` sampling value, without float widening noise
/// (`0.7f32` is sent as `0.7`, not `0.699999988`).
pub(crate) fn num(x: f32) -> Value {
    let widened = (f64::from(x) * 1e6).round() / 1e6;
    serde_json::Number::from_f64(widened)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Insert `key` only when a value is present.
pub(crate) fn set_opt(map: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(v) = value {
        map.insert(key.to_string(), v);
    }
}

pub(crate) fn stop_value(request: &CompletionRequest) -> Option<Value> {
    request
        .stop()
        .map(|s| Value::Array(s.iter().cloned().map(Value::String).collect()))
}
