//! 传输层：客户端实例共享的 HTTP 连接池。
//!
//! # Transport
//!
//! One [`HttpTransport`] is created per client and shared by the adapter for
//! every call. It owns authentication, request correlation ids, status-code
//! classification and the conversion of response bodies into JSON values or
//! byte streams.

pub mod http;

pub use http::{with_request_id, HttpTransport};
