//! # localai-client
//!
//! 本地文本生成服务的统一 Rust 客户端：一套接口对接 KoboldCpp、LM Studio、
//! Text Generation WebUI 与 Ollama，并内置重试、超时、熔断与进度通知。
//!
//! Resilient client for local text-generation servers.
//!
//! ## Overview
//!
//! Local inference servers each speak their own HTTP dialect. This library
//! hides them behind one [`Provider`] contract, chosen once from configuration,
//! and wraps every call in the same resilience policy so that a flaky or
//! overloaded local server degrades predictably instead of hanging the caller.
//!
//! ## Key Features
//!
//! - **One client**: [`LocalAiClient`] for completion, streaming, model listing and health checks
//! - **Backend adapters**: KoboldCpp (native and OpenAI-compatible), LM Studio, Text Generation WebUI, Ollama
//! - **Resilience**: exponential-backoff retry, per-attempt timeout and a circuit breaker via [`resilience`]
//! - **Streaming**: lazily-started fragment streams with cooperative cancellation via [`pipeline`]
//! - **Progress**: lifecycle events delivered to any number of [`ProgressSink`]s
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use localai_client::config::OllamaOptions;
//! use localai_client::{CompletionOptions, LocalAiClient, LocalAiConfig, ProviderOptions};
//!
//! #[tokio::main]
//! async fn main() -> localai_client::Result<()> {
//!     let config = LocalAiConfig::new(
//!         "http://localhost:11434",
//!         ProviderOptions::Ollama(OllamaOptions::default()),
//!     );
//!     let client = LocalAiClient::new(config)?;
//!
//!     let text = client
//!         .complete("Write a haiku about rust.", Some(CompletionOptions::new().max_tokens(64)))
//!         .await?;
//!     println!("{text}");
//!
//!     let mut stream = client.stream("Count to five.", None);
//!     while let Some(fragment) = stream.next().await {
//!         print!("{}", fragment?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | The orchestrating client and its builder |
//! | [`config`] | Client and per-backend settings, file and env loading |
//! | [`providers`] | Provider contract, dispatcher and backend adapters |
//! | [`resilience`] | Retry policy, circuit breaker and the engine combining them |
//! | [`pipeline`] | Stream decoders and the fragment stream |
//! | [`progress`] | Progress sinks and per-operation lifecycle tracking |
//! | [`transport`] | Shared HTTP transport |
//! | [`types`] | Requests, model descriptors and progress events |

pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod providers;
pub mod resilience;
pub mod transport;
pub mod types;

pub use client::{LocalAiClient, LocalAiClientBuilder};
pub use config::{LocalAiConfig, ProviderOptions};
pub use error::{Error, ErrorContext, ErrorKind};
pub use pipeline::FragmentStream;
pub use progress::{InMemoryProgressSink, ProgressSink, SubscriptionId};
pub use providers::Provider;
pub use resilience::{CircuitBreakerConfig, RetryPolicy};
pub use types::{
    CompletionOptions, CompletionRequest, ModelCapabilities, ModelDescriptor, ProgressEvent,
    ProgressState,
};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;
