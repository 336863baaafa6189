//! Backend adapters against mock HTTP servers, driven through the client.

use futures::StreamExt;
use localai_client::config::{
    KoboldCppNativeOptions, KoboldCppOpenAiOptions, LmStudioOptions, OllamaOptions,
    TextGenWebUiOptions,
};
use localai_client::{
    CompletionOptions, ErrorKind, InMemoryProgressSink, LocalAiClient, LocalAiConfig,
    ProgressState, ProviderOptions,
};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn client_for(server: &ServerGuard, options: ProviderOptions, max_retries: u32) -> LocalAiClient {
    let config = LocalAiConfig::new(server.url(), options)
        .with_max_retry_attempts(max_retries)
        .with_retry_delay(Duration::from_millis(10))
        .with_timeout(Duration::from_secs(5));
    LocalAiClient::new(config).unwrap()
}

fn sse(frames: &[&str]) -> String {
    frames.iter().map(|f| format!("data: {}\n\n", f)).collect()
}

async fn collect(client: &LocalAiClient, prompt: &str) -> Vec<String> {
    client
        .stream(prompt, None)
        .map(|f| f.unwrap())
        .collect()
        .await
}

#[tokio::test]
async fn test_kobold_native_complete_and_stream() {
    let mut server = Server::new_async().await;
    let generate = server
        .mock("POST", "/api/v1/generate")
        .match_body(Matcher::PartialJson(json!({
            "prompt": "Hello",
            "max_length": 80,
            "max_context_length": 2048,
            "stream": false
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"results":[{"text":" world"}]}"#)
        .create_async()
        .await;
    let stream = server
        .mock("POST", "/api/extra/generate/stream")
        .match_body(Matcher::PartialJson(json!({"stream": true})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(
            "event: message\ndata: {\"token\": \"Hel\"}\n\n\
             event: message\ndata: {\"token\": \"lo\"}\n\n",
        )
        .create_async()
        .await;

    let client = client_for(
        &server,
        ProviderOptions::KoboldCpp(KoboldCppNativeOptions::default()),
        0,
    );
    assert_eq!(client.complete("Hello", None).await.unwrap(), " world");
    assert_eq!(collect(&client, "Hello").await, vec!["Hel", "lo"]);

    generate.assert_async().await;
    stream.assert_async().await;
}

#[tokio::test]
async fn test_kobold_models_and_health() {
    let mut server = Server::new_async().await;
    let model = server
        .mock("GET", "/api/v1/model")
        .with_status(200)
        .with_body(r#"{"result":"koboldcpp/mistral-7b"}"#)
        .expect(2)
        .create_async()
        .await;
    server
        .mock("GET", "/api/extra/version")
        .with_status(200)
        .with_body(r#"{"result":"KoboldCpp","version":"1.62"}"#)
        .create_async()
        .await;

    let client = client_for(
        &server,
        ProviderOptions::KoboldCpp(KoboldCppNativeOptions::default()),
        0,
    );
    let models = client.list_models().await.unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].id, "koboldcpp/mistral-7b");
    assert_eq!(models[0].capabilities.max_context_length, 2048);
    assert_eq!(models[0].capabilities.max_generation_length, 2048);
    assert_eq!(models[0].metadata["use_gpu"], serde_json::json!(true));

    assert!(client.version().is_none());
    assert!(client.health_check().await);
    assert_eq!(client.version().as_deref(), Some("1.62"));
    model.assert_async().await;
}

#[tokio::test]
async fn test_kobold_empty_model_name_means_no_models() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/v1/model")
        .with_status(200)
        .with_body(r#"{"result":""}"#)
        .create_async()
        .await;

    let client = client_for(
        &server,
        ProviderOptions::KoboldCpp(KoboldCppNativeOptions::default()),
        0,
    );
    assert!(client.list_models().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_kobold_openai_mode_uses_completions() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("POST", "/v1/completions")
        .match_body(Matcher::PartialJson(json!({
            "model": "koboldcpp",
            "prompt": "Hi",
            "max_tokens": 12
        })))
        .with_status(200)
        .with_body(r#"{"choices":[{"text":"there"}]}"#)
        .create_async()
        .await;

    let client = client_for(
        &server,
        ProviderOptions::KoboldCppOpenAi(KoboldCppOpenAiOptions::default()),
        0,
    );
    let text = client
        .complete("Hi", Some(CompletionOptions::new().max_tokens(12)))
        .await
        .unwrap();
    assert_eq!(text, "there");
    m.assert_async().await;
}

#[tokio::test]
async fn test_lm_studio_chat_complete_and_stream() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({
            "messages": [{"role": "user", "content": "Hi"}],
            "stream": false
        })))
        .with_status(200)
        .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"Hello!"}}]}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({"stream": true})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(sse(&[
            r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo!"}}]}"#,
            "[DONE]",
        ]))
        .create_async()
        .await;

    let client = client_for(&server, ProviderOptions::LmStudio(LmStudioOptions::default()), 0);
    assert_eq!(client.complete("Hi", None).await.unwrap(), "Hello!");
    assert_eq!(collect(&client, "Hi").await, vec!["Hel", "lo!"]);
}

#[tokio::test]
async fn test_lm_studio_lists_models() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v1/models")
        .with_status(200)
        .with_body(r#"{"data":[{"id":"qwen2-7b"},{"id":"phi-3"}]}"#)
        .create_async()
        .await;

    let client = client_for(&server, ProviderOptions::LmStudio(LmStudioOptions::default()), 0);
    let ids: Vec<String> = client
        .list_models()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["qwen2-7b", "phi-3"]);
    assert!(client.health_check().await);
}

#[tokio::test]
async fn test_text_gen_webui_native_mode() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/v1/generate")
        .with_status(200)
        .with_body(r#"{"results":[{"text":"native text"}]}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/api/v1/stream")
        .with_status(200)
        .with_body(sse(&[
            r#"{"event":"text_stream","token":"na"}"#,
            r#"{"event":"text_stream","token":"tive"}"#,
            r#"{"event":"stream_end"}"#,
        ]))
        .create_async()
        .await;

    let options = TextGenWebUiOptions {
        use_openai_endpoint: false,
    };
    let client = client_for(&server, ProviderOptions::TextGenWebUi(options), 0);
    assert_eq!(client.complete("Go", None).await.unwrap(), "native text");
    assert_eq!(collect(&client, "Go").await, vec!["na", "tive"]);
}

#[tokio::test]
async fn test_ollama_generate_stream_and_tags() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/generate")
        .match_body(Matcher::PartialJson(json!({
            "model": "llama3",
            "prompt": "Why?",
            "stream": false,
            "options": {"num_predict": -1}
        })))
        .with_status(200)
        .with_body(r#"{"model":"llama3","response":"Because.","done":true}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/api/generate")
        .match_body(Matcher::PartialJson(json!({"stream": true})))
        .with_status(200)
        .with_header("content-type", "application/x-ndjson")
        .with_body(
            "{\"response\":\"Be\",\"done\":false}\n\
             {\"response\":\"cause\",\"done\":false}\n\
             {\"response\":\"\",\"done\":true}\n",
        )
        .create_async()
        .await;
    server
        .mock("GET", "/api/tags")
        .with_status(200)
        .with_body(
            r#"{"models":[{"name":"llama3:latest","size":4661224676,"digest":"365c0bd3","modified_at":"2024-05-01T10:00:00Z"}]}"#,
        )
        .create_async()
        .await;
    server
        .mock("GET", "/api/version")
        .with_status(200)
        .with_body(r#"{"version":"0.1.38"}"#)
        .create_async()
        .await;

    let client = client_for(&server, ProviderOptions::Ollama(OllamaOptions::default()), 0);
    let options = CompletionOptions::new().model("llama3");
    assert_eq!(
        client.complete("Why?", Some(options.clone())).await.unwrap(),
        "Because."
    );
    let fragments: Vec<String> = client
        .stream("Why?", Some(options))
        .map(|f| f.unwrap())
        .collect()
        .await;
    assert_eq!(fragments, vec!["Be", "cause"]);

    let models = client.list_models().await.unwrap();
    assert_eq!(models[0].id, "llama3:latest");
    assert_eq!(models[0].metadata["digest"], "365c0bd3");

    assert!(client.health_check().await);
    assert_eq!(client.version().as_deref(), Some("0.1.38"));
}

#[tokio::test]
async fn test_server_errors_are_retried_with_status_and_body() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("POST", "/api/generate")
        .with_status(503)
        .with_body("model is loading")
        .expect(3)
        .create_async()
        .await;

    let client = client_for(&server, ProviderOptions::Ollama(OllamaOptions::default()), 2);
    let err = client.complete("Hi", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.status_code(), Some(503));
    assert_eq!(err.response_body(), Some("model is loading"));
    assert_eq!(err.provider(), Some("Ollama"));
    m.assert_async().await;
}

#[tokio::test]
async fn test_client_errors_and_malformed_bodies_are_not_retried() {
    let mut server = Server::new_async().await;
    let rejected = server
        .mock("POST", "/v1/chat/completions")
        .with_status(400)
        .with_body(r#"{"error":"bad request"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server, ProviderOptions::LmStudio(LmStudioOptions::default()), 3);
    let err = client.complete("Hi", None).await.unwrap_err();
    assert_eq!(err.status_code(), Some(400));
    assert!(!err.is_retryable());
    rejected.assert_async().await;

    let mut server = Server::new_async().await;
    let garbled = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body("<html>not json</html>")
        .expect(1)
        .create_async()
        .await;
    let client = client_for(&server, ProviderOptions::LmStudio(LmStudioOptions::default()), 3);
    let err = client.complete("Hi", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(!err.is_retryable());
    garbled.assert_async().await;
}

#[tokio::test]
async fn test_requests_carry_auth_and_request_id() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer secret-key")
        .match_header("x-request-id", Matcher::Regex("^[0-9a-f-]{36}$".into()))
        .with_status(200)
        .with_body(r#"{"choices":[{"message":{"content":"ok"}}]}"#)
        .create_async()
        .await;

    let config = LocalAiConfig::new(
        server.url(),
        ProviderOptions::LmStudio(LmStudioOptions::default()),
    )
    .with_api_key("secret-key")
    .with_max_retry_attempts(0);
    let client = LocalAiClient::new(config).unwrap();
    assert_eq!(client.complete("Hi", None).await.unwrap(), "ok");
    m.assert_async().await;
}

#[tokio::test]
async fn test_unreachable_server_is_a_transport_error_and_unhealthy() {
    let config = LocalAiConfig::new(
        "http://127.0.0.1:1",
        ProviderOptions::Ollama(OllamaOptions::default()),
    )
    .with_max_retry_attempts(0)
    .with_timeout(Duration::from_secs(2));
    let client = LocalAiClient::new(config).unwrap();

    let sink = Arc::new(InMemoryProgressSink::new());
    client.subscribe(sink.clone());

    let err = client.complete("Hi", None).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Transport | ErrorKind::Timeout));
    assert_eq!(
        sink.states(),
        vec![ProgressState::Starting, ProgressState::Failed]
    );
    assert!(!client.health_check().await);
}
