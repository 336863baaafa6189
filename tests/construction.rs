//! Client construction: configuration loading and fail-fast validation.

use localai_client::config::{OllamaOptions, TextGenWebUiOptions};
use localai_client::{ErrorKind, LocalAiClient, LocalAiClientBuilder, LocalAiConfig, ProviderOptions};
use std::path::PathBuf;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn temp_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("{}-{}", uuid::Uuid::new_v4(), name));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_builds_each_backend_from_yaml() {
    let cases = [
        ("kobold_cpp", "KoboldCpp"),
        ("kobold_cpp_open_ai", "KoboldCpp"),
        ("lm_studio", "LMStudio"),
        ("text_gen_web_ui", "TextGenerationWebUI"),
        ("ollama", "Ollama"),
    ];
    for (tag, name) in cases {
        let yaml = format!("base_url: http://localhost:5001\nprovider:\n  type: {}\n", tag);
        let client = LocalAiClient::new(LocalAiConfig::from_yaml_str(&yaml).unwrap()).unwrap();
        assert_eq!(client.provider_name(), name, "tag {}", tag);
        assert!(client.supports_streaming());
    }
}

#[test]
fn test_loads_json_and_yaml_files() {
    let json = temp_file(
        "localai.json",
        r#"{"base_url": "http://localhost:11434", "retry_delay_ms": 250,
            "provider": {"type": "ollama", "concurrent_requests": 2}}"#,
    );
    let cfg = assert_ok!(LocalAiConfig::from_file(&json));
    assert_eq!(cfg.retry_delay, Duration::from_millis(250));
    assert_eq!(
        cfg.provider,
        Some(ProviderOptions::Ollama(OllamaOptions {
            concurrent_requests: 2
        }))
    );

    let yaml = temp_file(
        "localai.yaml",
        "provider:\n  type: text_gen_web_ui\n  use_openai_endpoint: false\ncircuit_breaker:\n  failure_threshold: 2\n  cooldown_ms: 5000\n",
    );
    let cfg = assert_ok!(LocalAiConfig::from_file(&yaml));
    assert_eq!(
        cfg.provider,
        Some(ProviderOptions::TextGenWebUi(TextGenWebUiOptions {
            use_openai_endpoint: false
        }))
    );
    assert_eq!(cfg.circuit_breaker.failure_threshold, 2);
    assert_eq!(cfg.circuit_breaker.cooldown, Duration::from_secs(5));

    std::fs::remove_file(json).ok();
    std::fs::remove_file(yaml).ok();
}

#[test]
fn test_missing_file_is_a_configuration_error() {
    let err = assert_err!(LocalAiConfig::from_file("/nonexistent/localai.yaml"));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_construction_fails_fast_without_provider_options() {
    let err = LocalAiClient::new(LocalAiConfig::default()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(!err.is_retryable());
}

#[test]
fn test_construction_rejects_invalid_settings() {
    let ollama = || ProviderOptions::Ollama(OllamaOptions::default());

    let zero_timeout = LocalAiConfig::new("http://localhost:11434", ollama())
        .with_timeout(Duration::ZERO);
    assert_eq!(
        LocalAiClient::new(zero_timeout).err().unwrap().kind(),
        ErrorKind::Configuration
    );

    let bad_scheme = LocalAiConfig::new("ftp://localhost:11434", ollama());
    assert_eq!(
        LocalAiClient::new(bad_scheme).err().unwrap().kind(),
        ErrorKind::Configuration
    );

    let no_slots = LocalAiConfig::new(
        "http://localhost:11434",
        ProviderOptions::Ollama(OllamaOptions {
            concurrent_requests: 0,
        }),
    );
    assert_eq!(
        LocalAiClient::new(no_slots).err().unwrap().kind(),
        ErrorKind::Configuration
    );
}

#[test]
fn test_builder_overrides_loaded_values() {
    let client = LocalAiClientBuilder::from_config(LocalAiConfig::new(
        "http://localhost:1234",
        ProviderOptions::Ollama(OllamaOptions::default()),
    ))
    .max_retry_attempts(0)
    .timeout(Duration::from_secs(3))
    .build()
    .unwrap();
    assert_eq!(client.config().max_retry_attempts, 0);
    assert_eq!(client.config().timeout, Duration::from_secs(3));
    assert_eq!(client.breaker_snapshot().failure_threshold, 5);
}
