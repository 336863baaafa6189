use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Capability flags reported for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub supports_streaming: bool,
    /// Maximum context length in tokens; 0 when the backend does not say.
    pub max_context_length: u32,
    /// Maximum generation length in tokens; 0 when the backend does not say.
    pub max_generation_length: u32,
    pub supports_sampling_params: bool,
    pub supports_stop_sequences: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub model_specific: Map<String, Value>,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            supports_streaming: false,
            max_context_length: 0,
            max_generation_length: 0,
            supports_sampling_params: true,
            supports_stop_sequences: true,
            model_specific: Map::new(),
        }
    }
}

/// A model served by a backend. Built fresh on every `list_models` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    /// Name of the provider that reported the model.
    pub provider: String,
    pub capabilities: ModelCapabilities,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ModelDescriptor {
    /// Descriptor whose display name equals its id, the common case for local servers.
    pub fn named(id: impl Into<String>, provider: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider: provider.into(),
            capabilities: ModelCapabilities::default(),
            metadata: Map::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: ModelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
