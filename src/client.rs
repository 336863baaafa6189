//! 客户端模块：面向调用方的编排层，把适配器、弹性引擎与进度通知组合成统一入口。
//!
//! # Client
//!
//! [`LocalAiClient`] is the only type most callers need. It is built from a
//! [`LocalAiConfig`](crate::LocalAiConfig) (directly or through
//! [`LocalAiClientBuilder`]) and exposes completion, streaming, model listing
//! and health checks against one local server.

pub mod builder;
pub mod core;

pub use builder::LocalAiClientBuilder;
pub use core::LocalAiClient;
