//! Client configuration.
//!
//! A [`LocalAiConfig`] holds the endpoint, credential, resilience knobs and
//! exactly one [`ProviderOptions`] variant selecting the backend family. It can
//! be built in code, or loaded from YAML/JSON and then overlaid with
//! environment variables:
//!
//! ```yaml
//! base_url: http://localhost:11434
//! timeout_ms: 60000
//! max_retry_attempts: 2
//! provider:
//!   type: ollama
//!   concurrent_requests: 2
//! ```

use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Serde helper storing a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

/// Immutable client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalAiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Deadline for each individual attempt.
    #[serde(default = "default_timeout", rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    /// Additional attempts after the first one.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Backoff base: retry `n` waits `retry_delay * 2^(n-1)`.
    #[serde(default = "default_retry_delay", rename = "retry_delay_ms", with = "duration_ms")]
    pub retry_delay: Duration,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderOptions>,
}

impl Default for LocalAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout: default_timeout(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay: default_retry_delay(),
            circuit_breaker: CircuitBreakerConfig::default(),
            provider: None,
        }
    }
}

impl LocalAiConfig {
    pub fn new(base_url: impl Into<String>, provider: ProviderOptions) -> Self {
        Self {
            base_url: base_url.into(),
            provider: Some(provider),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_circuit_breaker(mut self, cfg: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = cfg;
        self
    }

    pub fn with_provider(mut self, provider: ProviderOptions) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s)
            .map_err(|e| Error::configuration(format!("Invalid YAML configuration: {}", e)))
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s)
            .map_err(|e| Error::configuration(format!("Invalid JSON configuration: {}", e)))
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            _ => Self::from_yaml_str(&raw),
        }
    }

    /// Overlay values from the environment:
    /// - `LOCALAI_BASE_URL`
    /// - `LOCALAI_API_KEY`
    /// - `LOCALAI_TIMEOUT_MS`
    /// - `LOCALAI_MAX_RETRIES`
    /// - `LOCALAI_RETRY_DELAY_MS`
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
            raw.trim()
                .parse::<T>()
                .map_err(|_| Error::configuration(format!("{} has invalid value '{}'", name, raw)))
        }

        if let Some(v) = lookup("LOCALAI_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = lookup("LOCALAI_API_KEY") {
            self.api_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Some(v) = lookup("LOCALAI_TIMEOUT_MS") {
            self.timeout = Duration::from_millis(parse("LOCALAI_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("LOCALAI_MAX_RETRIES") {
            self.max_retry_attempts = parse("LOCALAI_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("LOCALAI_RETRY_DELAY_MS") {
            self.retry_delay = Duration::from_millis(parse("LOCALAI_RETRY_DELAY_MS", &v)?);
        }
        Ok(self)
    }

    /// Fail-fast checks run at client construction, before any network access.
    pub fn validate(&self) -> Result<()> {
        if self.provider.is_none() {
            return Err(Error::configuration("Provider options must be specified"));
        }
        self.validate_settings()
    }

    /// Checks everything except the presence of provider options, for clients
    /// built around a custom adapter.
    pub(crate) fn validate_settings(&self) -> Result<()> {
        let url = url::Url::parse(&self.base_url).map_err(|e| {
            Error::configuration(format!("Invalid base_url '{}': {}", self.base_url, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::configuration(format!(
                "base_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::configuration("timeout must be greater than zero"));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(Error::configuration(
                "circuit_breaker.failure_threshold must be at least 1",
            ));
        }
        if let Some(ProviderOptions::Ollama(o)) = &self.provider {
            if o.concurrent_requests == 0 {
                return Err(Error::configuration(
                    "ollama.concurrent_requests must be at least 1",
                ));
            }
        }
        Ok(())
    }
}

/// Backend family selection plus that backend's tunables.
///
/// Internally tagged by `type` when (de)serialized. Adding a backend means
/// adding a variant here and one match arm in the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderOptions {
    /// KoboldCpp native generate API.
    KoboldCpp(KoboldCppNativeOptions),
    /// KoboldCpp's OpenAI-compatible endpoints.
    KoboldCppOpenAi(KoboldCppOpenAiOptions),
    /// LM Studio (chat-style API).
    LmStudio(LmStudioOptions),
    /// oobabooga Text Generation WebUI (completions-style API).
    TextGenWebUi(TextGenWebUiOptions),
    Ollama(OllamaOptions),
}

impl ProviderOptions {
    /// Name of the provider these options configure.
    pub fn provider_name(&self) -> &'static str {
        match self {
            ProviderOptions::KoboldCpp(_) | ProviderOptions::KoboldCppOpenAi(_) => "KoboldCpp",
            ProviderOptions::LmStudio(_) => "LMStudio",
            ProviderOptions::TextGenWebUi(_) => "TextGenerationWebUI",
            ProviderOptions::Ollama(_) => "Ollama",
        }
    }
}

fn default_context_size() -> u32 {
    2048
}

fn default_true() -> bool {
    true
}

/// Settings shared by both KoboldCpp modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KoboldCppSettings {
    #[serde(default = "default_context_size")]
    pub context_size: u32,
    /// Informational. GPU offload is a KoboldCpp launch option, not a
    /// request field; the value is reported in model metadata only.
    #[serde(default = "default_true")]
    pub use_gpu: bool,
}

impl Default for KoboldCppSettings {
    fn default() -> Self {
        Self {
            context_size: default_context_size(),
            use_gpu: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirostatSettings {
    /// 0 = disabled, 1 = mirostat v1, 2 = mirostat v2.
    #[serde(default)]
    pub mode: u8,
    #[serde(default)]
    pub tau: f32,
    #[serde(default)]
    pub eta: f32,
}

fn default_rep_pen() -> f32 {
    1.1
}

fn default_rep_pen_range() -> u32 {
    320
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KoboldCppNativeOptions {
    #[serde(flatten)]
    pub kobold: KoboldCppSettings,
    #[serde(default = "default_rep_pen")]
    pub repetition_penalty: f32,
    #[serde(default = "default_rep_pen_range")]
    pub repetition_penalty_range: u32,
    /// Strip stop sequences from the generated text.
    #[serde(default = "default_true")]
    pub trim_stop: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirostat: Option<MirostatSettings>,
}

impl Default for KoboldCppNativeOptions {
    fn default() -> Self {
        Self {
            kobold: KoboldCppSettings::default(),
            repetition_penalty: default_rep_pen(),
            repetition_penalty_range: default_rep_pen_range(),
            trim_stop: true,
            mirostat: None,
        }
    }
}

fn default_kobold_model_name() -> String {
    "koboldcpp".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KoboldCppOpenAiOptions {
    #[serde(flatten)]
    pub kobold: KoboldCppSettings,
    #[serde(default = "default_kobold_model_name")]
    pub model_name: String,
    /// Use `v1/chat/completions` instead of `v1/completions`.
    #[serde(default)]
    pub use_chat_completions: bool,
}

impl Default for KoboldCppOpenAiOptions {
    fn default() -> Self {
        Self {
            kobold: KoboldCppSettings::default(),
            model_name: default_kobold_model_name(),
            use_chat_completions: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LmStudioOptions {
    /// Chat endpoint when true, plain completions otherwise.
    #[serde(default = "default_true")]
    pub use_openai_endpoint: bool,
}

impl Default for LmStudioOptions {
    fn default() -> Self {
        Self {
            use_openai_endpoint: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextGenWebUiOptions {
    /// OpenAI-compatible `v1/completions` when true, native `api/v1/*` otherwise.
    #[serde(default = "default_true")]
    pub use_openai_endpoint: bool,
}

impl Default for TextGenWebUiOptions {
    fn default() -> Self {
        Self {
            use_openai_endpoint: true,
        }
    }
}

fn default_concurrent_requests() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaOptions {
    /// Upper bound on in-flight generate requests.
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,
}

impl Default for OllamaOptions {
    fn default() -> Self {
        Self {
            concurrent_requests: default_concurrent_requests(),
        }
    }
}
