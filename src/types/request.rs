use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Optional controls for a single completion.
///
/// Every field is optional; adapters fill in their backend's defaults for
/// whatever is left unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Model to use, when the backend serves more than one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    /// Free-form backend parameters merged into the outgoing request body.
    /// Values here override the adapter's own defaults.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub provider_parameters: Map<String, Value>,
}

impl CompletionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn stop_sequence(mut self, stop: impl Into<String>) -> Self {
        self.stop_sequences.push(stop.into());
        self
    }

    pub fn provider_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.provider_parameters.insert(key.into(), value);
        self
    }
}

/// Prompt plus options for one logical call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub options: CompletionOptions,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, options: Option<CompletionOptions>) -> Self {
        Self {
            prompt: prompt.into(),
            options: options.unwrap_or_default(),
        }
    }

    /// Stop sequences, or `None` when the caller did not set any.
    pub fn stop(&self) -> Option<&[String]> {
        if self.options.stop_sequences.is_empty() {
            None
        } else {
            Some(&self.options.stop_sequences)
        }
    }

    /// Merge the caller's provider parameters into a JSON request body.
    pub(crate) fn merge_provider_parameters(&self, body: &mut Value) {
        if let Value::Object(map) = body {
            for (k, v) in &self.options.provider_parameters {
                map.insert(k.clone(), v.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_parameters_override_defaults() {
        let request = CompletionRequest::new(
            "hi",
            Some(
                CompletionOptions::new()
                    .provider_parameter("top_k", json!(40))
                    .provider_parameter("temperature", json!(0.1)),
            ),
        );
        let mut body = json!({"prompt": "hi", "temperature": 0.7});
        request.merge_provider_parameters(&mut body);
        assert_eq!(body["top_k"], json!(40));
        assert_eq!(body["temperature"], json!(0.1));
        assert_eq!(body["prompt"], json!("hi"));
    }

    #[test]
    fn test_stop_is_none_when_empty() {
        let request = CompletionRequest::new("hi", None);
        assert!(request.stop().is_none());

        let request = CompletionRequest::new("hi", Some(CompletionOptions::new().stop_sequence("###")));
        assert_eq!(request.stop(), Some(&["###".to_string()][..]));
    }
}
