//! 类型模块：补全请求、模型描述与进度事件等核心数据类型。
//!
//! # Types Module
//!
//! Backend-agnostic data shapes exchanged between callers, the client façade and
//! the provider adapters.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`CompletionOptions`] | Optional generation controls supplied by the caller |
//! | [`CompletionRequest`] | Prompt plus options, immutable for one call |
//! | [`ModelDescriptor`] | One model reported by a backend |
//! | [`ModelCapabilities`] | Capability flags attached to a model |
//! | [`ProgressEvent`] | Snapshot of an operation's lifecycle |
//! | [`ProgressState`] | Lifecycle state of an operation |
//!
//! ## Example
//!
//! ```rust
//! use localai_client::types::{CompletionOptions, CompletionRequest};
//!
//! let options = CompletionOptions::new()
//!     .max_tokens(128)
//!     .temperature(0.2)
//!     .stop_sequence("\n\n");
//! let request = CompletionRequest::new("Once upon a time", Some(options));
//! assert_eq!(request.options.max_tokens, Some(128));
//! ```

pub mod model;
pub mod progress;
pub mod request;

pub use model::{ModelCapabilities, ModelDescriptor};
pub use progress::{ProgressEvent, ProgressState};
pub use request::{CompletionOptions, CompletionRequest};
