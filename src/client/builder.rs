use crate::client::core::LocalAiClient;
use crate::config::{LocalAiConfig, ProviderOptions};
use crate::progress::{ProgressHub, ProgressSink};
use crate::providers::{create_provider, Provider};
use crate::resilience::{CircuitBreakerConfig, ResilienceEngine};
use crate::transport::HttpTransport;
use crate::Result;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`LocalAiClient`].
///
/// All checks run in [`build`](Self::build), before any network access.
pub struct LocalAiClientBuilder {
    config: LocalAiConfig,
    provider: Option<Arc<dyn Provider>>,
    sinks: Vec<Arc<dyn ProgressSink>>,
    env_overrides: bool,
}

impl Default for LocalAiClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalAiClientBuilder {
    pub fn new() -> Self {
        Self::from_config(LocalAiConfig::default())
    }

    pub fn from_config(config: LocalAiConfig) -> Self {
        Self {
            config,
            provider: None,
            sinks: Vec::new(),
            env_overrides: false,
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.api_key = Some(api_key.into());
        self
    }

    /// Per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.config.max_retry_attempts = attempts;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = breaker;
        self
    }

    pub fn provider_options(mut self, options: ProviderOptions) -> Self {
        self.config.provider = Some(options);
        self
    }

    /// Use a custom adapter instead of the one selected by the provider
    /// options. The options may then be left unset.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Register a progress observer before the first operation runs.
    pub fn progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Apply `LOCALAI_*` environment overrides at build time.
    pub fn env_overrides(mut self, enable: bool) -> Self {
        self.env_overrides = enable;
        self
    }

    pub fn build(self) -> Result<LocalAiClient> {
        let mut config = self.config;
        if self.env_overrides {
            config = config.apply_env_overrides()?;
        }

        match &self.provider {
            Some(_) => config.validate_settings()?,
            None => config.validate()?,
        }

        let provider_name = match (&self.provider, &config.provider) {
            (Some(p), _) => p.name().to_string(),
            (None, Some(options)) => options.provider_name().to_string(),
            (None, None) => String::new(),
        };

        let transport = Arc::new(HttpTransport::new(
            &config.base_url,
            provider_name.clone(),
            config.api_key.clone(),
            config.timeout,
        )?);
        let provider = match self.provider {
            Some(p) => p,
            None => create_provider(&config, Arc::clone(&transport))?,
        };
        let engine = Arc::new(ResilienceEngine::from_config(&config, provider_name));

        let hub = Arc::new(ProgressHub::new());
        for sink in self.sinks {
            hub.subscribe(sink);
        }

        tracing::debug!(
            provider = provider.name(),
            base_url = %config.base_url,
            max_attempts = engine.policy().max_attempts(),
            "local AI client built"
        );

        Ok(LocalAiClient {
            config,
            provider,
            transport,
            engine,
            hub,
            disposed: AtomicBool::new(false),
        })
    }
}
