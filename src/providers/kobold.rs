//! KoboldCpp adapters: the native `api/v1` generate API and the
//! OpenAI-compatible `v1/*` endpoints served by the same process.

use super::openai_compat::{self, Endpoint, SamplingDefaults};
use super::{num, set_opt, stop_value, Provider};
use crate::config::{KoboldCppNativeOptions, KoboldCppOpenAiOptions};
use crate::pipeline::{map_frames, Decoder, Frame, SseDecoder};
use crate::transport::HttpTransport;
use crate::types::{CompletionRequest, ModelCapabilities, ModelDescriptor};
use crate::{BoxStream, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

const NAME: &str = "KoboldCpp";
const DEFAULT_MAX_LENGTH: u32 = 80;
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_TOP_P: f32 = 0.9;
const MAX_GENERATION_LENGTH: u32 = 2048;

fn capabilities(context_size: u32) -> ModelCapabilities {
    ModelCapabilities {
        supports_streaming: true,
        max_context_length: context_size,
        max_generation_length: MAX_GENERATION_LENGTH,
        ..ModelCapabilities::default()
    }
}

/// Health: the model endpoint answers. On success the server version is
/// read from `api/extra/version` and remembered.
async fn probe(
    transport: &HttpTransport,
    health_path: &str,
    version: &RwLock<Option<String>>,
    cancel: &CancellationToken,
) -> bool {
    if let Err(e) = transport.get_json(health_path, cancel).await {
        tracing::debug!(provider = NAME, error = %e, "health check failed");
        return false;
    }
    if let Ok(v) = transport.get_json("api/extra/version", cancel).await {
        if let Some(found) = v["version"].as_str() {
            *version.write().unwrap_or_else(|p| p.into_inner()) = Some(found.to_string());
        }
    }
    true
}

/// Adapter for KoboldCpp's native generate API.
pub struct KoboldCppNativeProvider {
    options: KoboldCppNativeOptions,
    transport: Arc<HttpTransport>,
    version: RwLock<Option<String>>,
}

impl KoboldCppNativeProvider {
    pub fn new(options: KoboldCppNativeOptions, transport: Arc<HttpTransport>) -> Self {
        Self {
            options,
            transport,
            version: RwLock::new(None),
        }
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let opts = &request.options;
        let mut body = Map::new();
        body.insert("prompt".into(), Value::String(request.prompt.clone()));
        body.insert(
            "max_length".into(),
            opts.max_tokens.unwrap_or(DEFAULT_MAX_LENGTH).into(),
        );
        body.insert(
            "max_context_length".into(),
            self.options.kobold.context_size.into(),
        );
        body.insert(
            "temperature".into(),
            num(opts.temperature.unwrap_or(DEFAULT_TEMPERATURE)),
        );
        body.insert("top_p".into(), num(opts.top_p.unwrap_or(DEFAULT_TOP_P)));
        set_opt(&mut body, "stop_sequence", stop_value(request));
        body.insert("trim_stop".into(), self.options.trim_stop.into());
        body.insert("rep_pen".into(), num(self.options.repetition_penalty));
        body.insert(
            "rep_pen_range".into(),
            self.options.repetition_penalty_range.into(),
        );
        if let Some(m) = &self.options.mirostat {
            body.insert("mirostat".into(), m.mode.into());
            body.insert("mirostat_tau".into(), num(m.tau));
            body.insert("mirostat_eta".into(), num(m.eta));
        }
        body.insert("stream".into(), stream.into());

        let mut body = Value::Object(body);
        request.merge_provider_parameters(&mut body);
        body
    }
}

/// Native stream events carry the token either as a string or as `{text}`.
fn native_frame(v: &Value) -> Frame {
    match &v["token"] {
        Value::String(t) => Frame::Text(t.clone()),
        other => match other["text"].as_str() {
            Some(t) => Frame::Text(t.to_string()),
            None => Frame::Skip,
        },
    }
}

#[async_trait]
impl Provider for KoboldCppNativeProvider {
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
        let body = self.build_body(request, false);
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
        let bytes = self
            .transport
            .post_stream("api/extra/generate/stream", &body, cancel)
            .await?;
        let frames = SseDecoder::default().decode_stream(bytes);
        Ok(map_frames(frames, native_frame))
    }

    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<ModelDescriptor>> {
        let v = self.transport.get_json("api/v1/model", cancel).await?;
        let name = v["result"].as_str().unwrap_or_default();
        if name.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = ModelDescriptor::named(name, NAME)
            .with_capabilities(capabilities(self.options.kobold.context_size))
            .with_metadata("use_gpu", Value::Bool(self.options.kobold.use_gpu));
        for key in ["model_type", "gpu_layers", "vocab_size"] {
            if !v[key].is_null() {
                model = model.with_metadata(key, v[key].clone());
            }
        }
        Ok(vec![model])
    }

    async fn health_check(&self, cancel: &CancellationToken) -> bool {
        probe(&self.transport, "api/v1/model", &self.version, cancel).await
    }

    fn dispose(&self) {
        self.transport.dispose();
    }
}

/// Adapter for KoboldCpp's OpenAI-compatible endpoints.
pub struct KoboldCppOpenAiProvider {
    options: KoboldCppOpenAiOptions,
    transport: Arc<HttpTransport>,
    version: RwLock<Option<String>>,
}

impl KoboldCppOpenAiProvider {
    pub fn new(options: KoboldCppOpenAiOptions, transport: Arc<HttpTransport>) -> Self {
        Self {
            options,
            transport,
            version: RwLock::new(None),
        }
    }

    fn endpoint(&self) -> Endpoint {
        if self.options.use_chat_completions {
            Endpoint::ChatCompletions
        } else {
            Endpoint::Completions
        }
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let model = request
            .options
            .model
            .as_deref()
            .unwrap_or(&self.options.model_name);
        let defaults = SamplingDefaults {
            max_tokens: Some(DEFAULT_MAX_LENGTH),
            temperature: Some(DEFAULT_TEMPERATURE),
            top_p: Some(DEFAULT_TOP_P),
        };
        openai_compat::build_body(self.endpoint(), Some(model), request, &defaults, stream)
    }
}

#[async_trait]
impl Provider for KoboldCppOpenAiProvider {
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
        openai_compat::list_models(
            &self.transport,
            NAME,
            capabilities(self.options.kobold.context_size),
            cancel,
        )
        .await
    }

    async fn health_check(&self, cancel: &CancellationToken) -> bool {
        probe(&self.transport, "v1/models", &self.version, cancel).await
    }

    fn dispose(&self) {
        self.transport.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MirostatSettings;
    use serde_json::json;
    use crate::types::CompletionOptions;
    use std::time::Duration;

    fn transport() -> Arc<HttpTransport> {
        Arc::new(
            HttpTransport::new("http://localhost:5001", NAME, None, Duration::from_secs(1))
                .unwrap(),
        )
    }

    #[test]
    fn test_native_body_defaults() {
        let p = KoboldCppNativeProvider::new(KoboldCppNativeOptions::default(), transport());
        let body = p.build_body(&CompletionRequest::new("Hello", None), false);
        assert_eq!(
            body,
            json!({
                "prompt": "Hello",
                "max_length": 80,
                "max_context_length": 2048,
                "temperature": 0.7,
                "top_p": 0.9,
                "trim_stop": true,
                "rep_pen": 1.1,
                "rep_pen_range": 320,
                "stream": false
            })
        );
    }

    #[test]
    fn test_native_body_with_mirostat_and_overrides() {
        let options = KoboldCppNativeOptions {
            mirostat: Some(MirostatSettings {
                mode: 2,
                tau: 5.0,
                eta: 0.1,
            }),
            ..Default::default()
        };
        let p = KoboldCppNativeProvider::new(options, transport());
        let req = CompletionRequest::new(
            "Hi",
            Some(
                CompletionOptions::new()
                    .max_tokens(10)
                    .stop_sequence("###")
                    .provider_parameter("top_k", json!(40)),
            ),
        );
        let body = p.build_body(&req, true);
        assert_eq!(body["max_length"], 10);
        assert_eq!(body["stop_sequence"], json!(["###"]));
        assert_eq!(body["mirostat"], 2);
        assert_eq!(body["mirostat_tau"], json!(5.0));
        assert_eq!(body["mirostat_eta"], json!(0.1));
        assert_eq!(body["top_k"], 40);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_native_frame_shapes() {
        assert_eq!(native_frame(&json!({"token": "a"})), Frame::Text("a".into()));
        assert_eq!(
            native_frame(&json!({"token": {"text": "b"}})),
            Frame::Text("b".into())
        );
        assert_eq!(native_frame(&json!({"full_text": "x"})), Frame::Skip);
    }

    #[test]
    fn test_openai_body_uses_configured_model() {
        let p = KoboldCppOpenAiProvider::new(KoboldCppOpenAiOptions::default(), transport());
        let body = p.build_body(&CompletionRequest::new("Hi", None), false);
        assert_eq!(body["model"], "koboldcpp");
        assert_eq!(body["prompt"], "Hi");
        assert_eq!(body["max_tokens"], 80);

        let req = CompletionRequest::new("Hi", Some(CompletionOptions::new().model("llama")));
        assert_eq!(p.build_body(&req, false)["model"], "llama");
    }
}
