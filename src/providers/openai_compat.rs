//! Wire helpers for the OpenAI-style `v1/completions` and
//! `v1/chat/completions` endpoints exposed by several local servers.

use super::{num, set_opt, stop_value};
use crate::pipeline::{map_frames, Decoder, Frame, SseDecoder};
use crate::transport::HttpTransport;
use crate::types::{CompletionRequest, ModelCapabilities, ModelDescriptor};
use crate::{BoxStream, Result};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endpoint {
    Completions,
    ChatCompletions,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Completions => "v1/completions",
            Endpoint::ChatCompletions => "v1/chat/completions",
        }
    }
}

/// Values sent when the caller leaves a sampling option unset.
#[derive(Debug, Clone, Default)]
pub(crate) struct SamplingDefaults {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

pub(crate) fn build_body(
    endpoint: Endpoint,
    model: Option<&str>,
    request: &CompletionRequest,
    defaults: &SamplingDefaults,
    stream: bool,
) -> Value {
    let opts = &request.options;
    let mut body = Map::new();
    set_opt(&mut body, "model", model.map(|m| Value::String(m.to_string())));
    match endpoint {
        Endpoint::Completions => {
            body.insert("prompt".into(), Value::String(request.prompt.clone()));
        }
        Endpoint::ChatCompletions => {
            body.insert(
                "messages".into(),
                serde_json::json!([{ "role": "user", "content": request.prompt }]),
            );
        }
    }
    set_opt(
        &mut body,
        "max_tokens",
        opts.max_tokens.or(defaults.max_tokens).map(Value::from),
    );
    set_opt(
        &mut body,
        "temperature",
        opts.temperature.or(defaults.temperature).map(num),
    );
    set_opt(&mut body, "top_p", opts.top_p.or(defaults.top_p).map(num));
    set_opt(&mut body, "stop", stop_value(request));
    body.insert("stream".into(), Value::Bool(stream));

    let mut body = Value::Object(body);
    request.merge_provider_parameters(&mut body);
    body
}

/// Text of a non-streaming response; missing fields yield an empty string.
pub(crate) fn completion_text(endpoint: Endpoint, v: &Value) -> String {
    let choice = &v["choices"][0];
    let text = match endpoint {
        Endpoint::Completions => &choice["text"],
        Endpoint::ChatCompletions => &choice["message"]["content"],
    };
    text.as_str().unwrap_or_default().to_string()
}

pub(crate) fn stream_frame(endpoint: Endpoint, v: &Value) -> Frame {
    let choice = &v["choices"][0];
    let text = match endpoint {
        Endpoint::Completions => &choice["text"],
        Endpoint::ChatCompletions => &choice["delta"]["content"],
    };
    match text.as_str() {
        Some(t) => Frame::Text(t.to_string()),
        None => Frame::Skip,
    }
}

pub(crate) async fn complete(
    transport: &HttpTransport,
    endpoint: Endpoint,
    body: &Value,
    cancel: &CancellationToken,
) -> Result<String> {
    let v = transport.post_json(endpoint.path(), body, cancel).await?;
    Ok(completion_text(endpoint, &v))
}

pub(crate) async fn stream(
    transport: &HttpTransport,
    endpoint: Endpoint,
    body: &Value,
    cancel: &CancellationToken,
) -> Result<BoxStream<'static, String>> {
    let bytes = transport.post_stream(endpoint.path(), body, cancel).await?;
    let frames = SseDecoder::default().decode_stream(bytes);
    Ok(map_frames(frames, move |v| stream_frame(endpoint, v)))
}

/// `GET v1/models` → one descriptor per `data[].id`.
pub(crate) async fn list_models(
    transport: &HttpTransport,
    provider: &str,
    capabilities: ModelCapabilities,
    cancel: &CancellationToken,
) -> Result<Vec<ModelDescriptor>> {
    let v = transport.get_json("v1/models", cancel).await?;
    Ok(v["data"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m["id"].as_str())
                .map(|id| ModelDescriptor::named(id, provider).with_capabilities(capabilities.clone()))
                .collect()
        })
        .unwrap_or_default())
}
